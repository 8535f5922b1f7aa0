//! Synchronization controller: canonical client-side view state.
//!
//! # Responsibility
//! - Own the project list, the task list, the selection and notifications.
//! - Reconcile gateway fetches (wholesale replace) and push events (patch).
//! - Publish a fresh `ViewSnapshot` after every state change.
//!
//! # Invariants
//! - Task ids are unique within `tasks`.
//! - `tasks` only holds tasks matching `selection` (all tasks when `None`).
//! - A fetch result is applied only if its ticket is the latest issued one.
//! - After `shutdown`, no result or event mutates state.
//!
//! Mutations are split into `prepare_*` / `complete_*` steps so a driver can
//! keep several gateway calls in flight; the `async` methods compose them for
//! callers that simply await one command at a time.

use crate::gateway::{Ack, GatewayError, GatewayResult, TaskGateway};
use crate::model::project::{NewProject, Project, ProjectId};
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use crate::model::ValidationError;
use crate::notify::{Notification, NotificationQueue, DEFAULT_NOTIFICATION_TTL};
use crate::push::PushEvent;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Command failure surfaced to the caller. State is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    Validation(ValidationError),
    Gateway(GatewayError),
    /// The controller was shut down before or during the command.
    Defunct,
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Gateway(err) => write!(f, "{err}"),
            Self::Defunct => write!(f, "controller is shut down"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Gateway(err) => Some(err),
            Self::Defunct => None,
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<GatewayError> for SyncError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}

/// What happened to a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The collection was replaced.
    Applied,
    /// A newer load was issued; the result was discarded.
    Superseded,
    /// The controller was shut down; the result was discarded.
    Defunct,
}

/// Issued for every project fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectLoadTicket {
    generation: u64,
}

/// Issued for every task fetch; carries the selection it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLoadTicket {
    generation: u64,
    selection: Option<ProjectId>,
}

impl TaskLoadTicket {
    pub fn selection(&self) -> Option<ProjectId> {
        self.selection
    }
}

/// Read-only copy of the view state for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewSnapshot {
    /// Incremented on every publish.
    pub revision: u64,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub selection: Option<ProjectId>,
    pub notifications: Vec<Notification>,
}

/// Owns the canonical collections and applies every mutation to them.
pub struct SyncController<G: TaskGateway> {
    gateway: Arc<G>,
    projects: Vec<Project>,
    tasks: Vec<Task>,
    selection: Option<ProjectId>,
    notifications: NotificationQueue,
    project_generation: u64,
    task_generation: u64,
    revision: u64,
    alive: bool,
    view: watch::Sender<ViewSnapshot>,
}

impl<G: TaskGateway> SyncController<G> {
    /// Creates a controller with the default notification lifetime.
    pub fn new(gateway: Arc<G>) -> Self {
        Self::with_notification_ttl(gateway, DEFAULT_NOTIFICATION_TTL)
    }

    pub fn with_notification_ttl(gateway: Arc<G>, ttl: Duration) -> Self {
        let (view, _) = watch::channel(ViewSnapshot::default());
        Self {
            gateway,
            projects: Vec::new(),
            tasks: Vec::new(),
            selection: None,
            notifications: NotificationQueue::new(ttl),
            project_generation: 0,
            task_generation: 0,
            revision: 0,
            alive: true,
            view,
        }
    }

    pub fn gateway(&self) -> Arc<G> {
        Arc::clone(&self.gateway)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Active task list for the current selection.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn selection(&self) -> Option<ProjectId> {
        self.selection
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.active()
    }

    pub fn next_notification_expiry(&self) -> Option<Instant> {
        self.notifications.next_expiry()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Change notifications for the presentation layer.
    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            revision: self.revision,
            projects: self.projects.clone(),
            tasks: self.tasks.clone(),
            selection: self.selection,
            notifications: self.notifications.active().cloned().collect(),
        }
    }

    /// Marks the controller defunct; later results and events are ignored.
    pub fn shutdown(&mut self) {
        if self.alive {
            self.alive = false;
            info!("event=controller_shutdown module=controller status=ok");
        }
    }

    pub fn begin_project_load(&mut self) -> ProjectLoadTicket {
        self.project_generation += 1;
        ProjectLoadTicket {
            generation: self.project_generation,
        }
    }

    /// Applies a project fetch issued with `ticket`.
    ///
    /// # Errors
    /// - Returns the gateway error of a current load; prior state is kept.
    pub fn finish_project_load(
        &mut self,
        ticket: ProjectLoadTicket,
        result: GatewayResult<Vec<Project>>,
    ) -> GatewayResult<LoadOutcome> {
        if !self.alive {
            return Ok(LoadOutcome::Defunct);
        }
        if ticket.generation != self.project_generation {
            debug!(
                "event=load_projects module=controller status=superseded generation={}",
                ticket.generation
            );
            return Ok(LoadOutcome::Superseded);
        }
        match result {
            Ok(projects) => {
                self.projects = projects;
                self.publish();
                Ok(LoadOutcome::Applied)
            }
            Err(err) => {
                warn!("event=load_projects module=controller status=error error={err}");
                Err(err)
            }
        }
    }

    pub fn begin_task_load(&mut self) -> TaskLoadTicket {
        self.task_generation += 1;
        TaskLoadTicket {
            generation: self.task_generation,
            selection: self.selection,
        }
    }

    /// Applies a task fetch issued with `ticket`.
    ///
    /// # Errors
    /// - Returns the gateway error of a current load; prior state is kept.
    pub fn finish_task_load(
        &mut self,
        ticket: TaskLoadTicket,
        result: GatewayResult<Vec<Task>>,
    ) -> GatewayResult<LoadOutcome> {
        if !self.alive {
            return Ok(LoadOutcome::Defunct);
        }
        if ticket.generation != self.task_generation {
            debug!(
                "event=load_tasks module=controller status=superseded generation={}",
                ticket.generation
            );
            return Ok(LoadOutcome::Superseded);
        }
        match result {
            Ok(tasks) => {
                let selection = ticket.selection;
                self.tasks = dedupe_by_id(
                    tasks
                        .into_iter()
                        .filter(|task| task.matches_selection(selection))
                        .collect(),
                );
                self.publish();
                Ok(LoadOutcome::Applied)
            }
            Err(err) => {
                warn!(
                    "event=load_tasks module=controller status=error selection={} error={err}",
                    selection_label(ticket.selection)
                );
                Err(err)
            }
        }
    }

    /// Replaces the project collection with the latest server list.
    ///
    /// # Errors
    /// - Returns the gateway error; prior state is kept.
    pub async fn load_projects(&mut self) -> GatewayResult<LoadOutcome> {
        let ticket = self.begin_project_load();
        let result = self.gateway.fetch_projects().await;
        self.finish_project_load(ticket, result)
    }

    /// Replaces the task collection with the server list for the selection.
    ///
    /// # Errors
    /// - Returns the gateway error; prior state is kept.
    pub async fn load_tasks(&mut self) -> GatewayResult<LoadOutcome> {
        let ticket = self.begin_task_load();
        let result = self.gateway.fetch_tasks(ticket.selection).await;
        self.finish_task_load(ticket, result)
    }

    /// Changes the project filter and returns the ticket of the reload it needs.
    ///
    /// Tasks outside the new selection are dropped right away; widening the
    /// selection shows the full list once the reload lands.
    pub fn select(&mut self, selection: Option<ProjectId>) -> TaskLoadTicket {
        self.selection = selection;
        self.tasks.retain(|task| task.matches_selection(selection));
        self.publish();
        self.begin_task_load()
    }

    /// Changes the project filter and reloads tasks.
    ///
    /// # Errors
    /// - Returns the reload's gateway error; the selection still changes.
    pub async fn set_selection(
        &mut self,
        selection: Option<ProjectId>,
    ) -> GatewayResult<LoadOutcome> {
        let ticket = self.select(selection);
        let result = self.gateway.fetch_tasks(ticket.selection).await;
        self.finish_task_load(ticket, result)
    }

    /// Applies one server event without a gateway round-trip.
    ///
    /// Upserts replace a task with the same id or append a new one, and
    /// always enqueue a notification. Deletions enqueue nothing.
    pub fn apply_push_event(&mut self, event: PushEvent) {
        self.apply_push_event_at(event, Instant::now());
    }

    pub fn apply_push_event_at(&mut self, event: PushEvent, now: Instant) {
        if !self.alive {
            debug!(
                "event=push_apply module=controller status=defunct task_id={}",
                event.task_id()
            );
            return;
        }
        match event {
            PushEvent::Upsert(task) => self.upsert_task(task, now),
            PushEvent::Deletion(task_id) => self.delete_task(task_id),
        }
    }

    fn upsert_task(&mut self, task: Task, now: Instant) {
        let message = format!("task updated: {}", task.title);
        let visible = task.matches_selection(self.selection);
        let position = self.tasks.iter().position(|existing| existing.id == task.id);
        match (position, visible) {
            (Some(index), true) => self.tasks[index] = task,
            (None, true) => self.tasks.push(task),
            (Some(index), false) => {
                self.tasks.remove(index);
            }
            (None, false) => {}
        }
        self.notifications.enqueue(message, now);
        self.publish();
    }

    fn delete_task(&mut self, task_id: TaskId) {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != task_id);
        if self.tasks.len() != before {
            self.publish();
        }
    }

    /// Validates `create_project` input.
    ///
    /// # Errors
    /// - `SyncError::Defunct` after shutdown, `SyncError::Validation` for bad input.
    pub fn prepare_create_project(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<NewProject, SyncError> {
        self.ensure_alive()?;
        NewProject::new(name, description).map_err(|err| {
            warn!("event=create_project module=controller status=rejected error={err}");
            SyncError::from(err)
        })
    }

    /// Handles the gateway answer; returns the ticket of the follow-up reload.
    ///
    /// # Errors
    /// - Returns the gateway error, or `Defunct` after shutdown.
    pub fn complete_create_project(
        &mut self,
        input: &NewProject,
        result: GatewayResult<Ack>,
    ) -> Result<ProjectLoadTicket, SyncError> {
        self.ensure_alive()?;
        match result {
            Ok(ack) => {
                info!(
                    "event=create_project module=controller status=ok http_status={}",
                    ack.status
                );
                Ok(self.begin_project_load())
            }
            Err(err) => {
                warn!(
                    "event=create_project module=controller status=error name_chars={} error={err}",
                    input.name.chars().count()
                );
                Err(err.into())
            }
        }
    }

    /// Creates a project, then reloads projects.
    ///
    /// # Errors
    /// - Returns validation or gateway errors of the create call. Reload
    ///   errors are logged only.
    pub async fn create_project(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<(), SyncError> {
        let input = self.prepare_create_project(name, description)?;
        let result = self.gateway.create_project(&input).await;
        let ticket = self.complete_create_project(&input, result)?;
        let fetched = self.gateway.fetch_projects().await;
        let _ = self.finish_project_load(ticket, fetched);
        Ok(())
    }

    /// Validates `create_task` input.
    ///
    /// # Errors
    /// - `SyncError::Defunct` after shutdown, `SyncError::Validation` for bad input.
    pub fn prepare_create_task(
        &self,
        title: impl Into<String>,
        description: Option<String>,
        project_id: Option<ProjectId>,
    ) -> Result<NewTask, SyncError> {
        self.ensure_alive()?;
        NewTask::new(title, description, project_id).map_err(|err| {
            warn!("event=create_task module=controller status=rejected error={err}");
            SyncError::from(err)
        })
    }

    /// Handles the gateway answer: on success enqueues a creation notice and
    /// returns the ticket of the follow-up reload.
    ///
    /// # Errors
    /// - Returns the gateway error, or `Defunct` after shutdown.
    pub fn complete_create_task(
        &mut self,
        input: &NewTask,
        result: GatewayResult<Ack>,
    ) -> Result<TaskLoadTicket, SyncError> {
        self.ensure_alive()?;
        match result {
            Ok(ack) => {
                info!(
                    "event=create_task module=controller status=ok http_status={} project={}",
                    ack.status,
                    selection_label(input.project_id)
                );
                self.notifications
                    .enqueue(format!("task created: {}", input.title), Instant::now());
                self.publish();
                Ok(self.begin_task_load())
            }
            Err(err) => {
                warn!(
                    "event=create_task module=controller status=error project={} error={err}",
                    selection_label(input.project_id)
                );
                Err(err.into())
            }
        }
    }

    /// Creates a task, notifies, then reloads tasks.
    ///
    /// # Errors
    /// - Returns validation or gateway errors of the create call. Reload
    ///   errors are logged only.
    pub async fn create_task(
        &mut self,
        title: impl Into<String>,
        description: Option<String>,
        project_id: Option<ProjectId>,
    ) -> Result<(), SyncError> {
        let input = self.prepare_create_task(title, description, project_id)?;
        let result = self.gateway.create_task(&input).await;
        let ticket = self.complete_create_task(&input, result)?;
        let fetched = self.gateway.fetch_tasks(ticket.selection).await;
        let _ = self.finish_task_load(ticket, fetched);
        Ok(())
    }

    /// Handles the status-update answer; returns the follow-up reload ticket.
    ///
    /// # Errors
    /// - Returns the gateway error, or `Defunct` after shutdown.
    pub fn complete_update_task_status(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
        result: GatewayResult<Ack>,
    ) -> Result<TaskLoadTicket, SyncError> {
        self.ensure_alive()?;
        match result {
            Ok(_) => {
                info!(
                    "event=update_task_status module=controller status=ok task_id={} task_status={}",
                    task_id, status
                );
                Ok(self.begin_task_load())
            }
            Err(err) => {
                warn!(
                    "event=update_task_status module=controller status=error task_id={} error={}",
                    task_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Updates a task's status, then reloads tasks.
    ///
    /// # Errors
    /// - Returns the gateway error of the update call. Reload errors are
    ///   logged only.
    pub async fn update_task_status(
        &mut self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), SyncError> {
        self.ensure_alive()?;
        let result = self.gateway.update_task_status(task_id, status).await;
        let ticket = self.complete_update_task_status(task_id, status, result)?;
        let fetched = self.gateway.fetch_tasks(ticket.selection).await;
        let _ = self.finish_task_load(ticket, fetched);
        Ok(())
    }

    /// Drops notifications due at `now`. Returns how many were removed.
    pub fn expire_notifications(&mut self, now: Instant) -> usize {
        let removed = self.notifications.expire(now);
        if removed > 0 && self.alive {
            self.publish();
        }
        removed
    }

    fn ensure_alive(&self) -> Result<(), SyncError> {
        if self.alive {
            Ok(())
        } else {
            Err(SyncError::Defunct)
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = self.snapshot();
        self.view.send_replace(snapshot);
    }
}

/// Keeps the last occurrence of each id at the position of that last occurrence.
fn dedupe_by_id(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::with_capacity(tasks.len());
    let mut deduped: Vec<Task> = tasks
        .into_iter()
        .rev()
        .filter(|task| seen.insert(task.id))
        .collect();
    deduped.reverse();
    deduped
}

fn selection_label(selection: Option<ProjectId>) -> String {
    match selection {
        Some(id) => id.to_string(),
        None => "all".to_string(),
    }
}
