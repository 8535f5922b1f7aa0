//! Single-task event loop driving one `SyncController`.
//!
//! # Responsibility
//! - Turn user commands into gateway calls and feed completions back through
//!   the controller's ticket API.
//! - Apply push events and reload tasks after the push channel resubscribes.
//! - Expire notifications on one timer set to the earliest deadline.
//!
//! # Invariants
//! - Only the loop task touches controller state.
//! - Gateway calls run concurrently; their results are applied in completion
//!   order and stale loads are discarded by the controller.
//! - After the loop exits the controller is defunct and in-flight calls are dropped.
//! - Outcome delivery never blocks the loop; outcomes beyond `OUTCOME_BUFFER`
//!   unread ones are dropped.

use crate::controller::{ProjectLoadTicket, SyncController, SyncError, TaskLoadTicket, ViewSnapshot};
use crate::gateway::{Ack, GatewayResult, TaskGateway};
use crate::model::project::{NewProject, Project, ProjectId};
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use crate::push::{ChannelState, PushEvent};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;

/// Unread command outcomes held for the handle before new ones are dropped.
pub const OUTCOME_BUFFER: usize = 64;

/// User intent accepted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `None` shows tasks of every project.
    SelectProject(Option<ProjectId>),
    CreateProject {
        name: String,
        description: Option<String>,
    },
    CreateTask {
        title: String,
        description: Option<String>,
        project_id: Option<ProjectId>,
    },
    UpdateTaskStatus {
        task_id: TaskId,
        status: TaskStatus,
    },
    /// Refetch projects and tasks.
    Reload,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectProject(_) => "select_project",
            Self::CreateProject { .. } => "create_project",
            Self::CreateTask { .. } => "create_task",
            Self::UpdateTaskStatus { .. } => "update_task_status",
            Self::Reload => "reload",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether the runtime answers this command with a `CommandOutcome`.
    pub fn reports_outcome(&self) -> bool {
        matches!(
            self,
            Self::CreateProject { .. } | Self::CreateTask { .. } | Self::UpdateTaskStatus { .. }
        )
    }
}

/// Result of a mutating command, reported once the server answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: &'static str,
    pub result: Result<(), SyncError>,
}

/// The runtime loop has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeClosed;

impl Display for RuntimeClosed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime is no longer running")
    }
}

impl Error for RuntimeClosed {}

/// Caller side of a runtime.
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    outcomes: mpsc::Receiver<CommandOutcome>,
    view: watch::Receiver<ViewSnapshot>,
    cancel: CancellationToken,
}

impl RuntimeHandle {
    /// Queues a command for the loop.
    ///
    /// # Errors
    /// - Returns `RuntimeClosed` once the loop has exited.
    pub async fn send(&self, command: Command) -> Result<(), RuntimeClosed> {
        self.commands.send(command).await.map_err(|_| RuntimeClosed)
    }

    /// Next command outcome, or `None` once the loop has exited.
    pub async fn next_outcome(&mut self) -> Option<CommandOutcome> {
        self.outcomes.recv().await
    }

    pub fn view(&self) -> watch::Receiver<ViewSnapshot> {
        self.view.clone()
    }

    /// Stops the loop without waiting for queued commands.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

enum Completion {
    Projects(ProjectLoadTicket, GatewayResult<Vec<Project>>),
    Tasks(TaskLoadTicket, GatewayResult<Vec<Task>>),
    ProjectCreated(NewProject, GatewayResult<Ack>),
    TaskCreated(NewTask, GatewayResult<Ack>),
    StatusUpdated(TaskId, TaskStatus, GatewayResult<Ack>),
}

/// Event loop owning the controller.
pub struct Runtime<G: TaskGateway + 'static> {
    controller: SyncController<G>,
    commands: mpsc::Receiver<Command>,
    push_events: Option<mpsc::Receiver<PushEvent>>,
    push_state: Option<watch::Receiver<ChannelState>>,
    outcomes: mpsc::Sender<CommandOutcome>,
    cancel: CancellationToken,
}

impl<G: TaskGateway + 'static> Runtime<G> {
    pub fn new(controller: SyncController<G>) -> (Self, RuntimeHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_BUFFER);
        let cancel = CancellationToken::new();
        let handle = RuntimeHandle {
            commands: command_tx,
            outcomes: outcome_rx,
            view: controller.subscribe(),
            cancel: cancel.clone(),
        };
        let runtime = Self {
            controller,
            commands: command_rx,
            push_events: None,
            push_state: None,
            outcomes: outcome_tx,
            cancel,
        };
        (runtime, handle)
    }

    /// Feeds push events and channel state into the loop.
    pub fn attach_push(
        &mut self,
        events: mpsc::Receiver<PushEvent>,
        state: watch::Receiver<ChannelState>,
    ) {
        self.push_events = Some(events);
        self.push_state = Some(state);
    }

    /// Runs until `Command::Shutdown`, handle shutdown, or every handle is dropped.
    ///
    /// Returns the defunct controller so callers can inspect final state.
    pub async fn run(self) -> SyncController<G> {
        let Self {
            controller,
            mut commands,
            mut push_events,
            mut push_state,
            outcomes,
            cancel,
        } = self;
        let mut driver = Driver {
            controller,
            in_flight: FuturesUnordered::new(),
            outcomes,
        };
        let mut ever_subscribed = push_state
            .as_ref()
            .is_some_and(|state| *state.borrow() == ChannelState::Subscribed);

        info!("event=runtime_start module=runtime status=ok");
        driver.reload();

        loop {
            let expiry = driver.controller.next_notification_expiry();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => driver.handle_command(command),
                },
                Some(completion) = driver.in_flight.next(), if !driver.in_flight.is_empty() => {
                    driver.handle_completion(completion);
                }
                event = next_push_event(&mut push_events) => match event {
                    Some(event) => driver.controller.apply_push_event(event),
                    None => {
                        debug!("event=push_events_closed module=runtime");
                        push_events = None;
                    }
                },
                state = next_channel_state(&mut push_state) => match state {
                    Some(ChannelState::Subscribed) => {
                        if ever_subscribed {
                            info!("event=push_resubscribed module=runtime action=reload_tasks");
                            driver.reload_tasks();
                        }
                        ever_subscribed = true;
                    }
                    Some(other) => debug!("event=push_state module=runtime state={other:?}"),
                    None => push_state = None,
                },
                _ = sleep_until_deadline(expiry) => {
                    driver.controller.expire_notifications(Instant::now());
                }
            }
        }

        let mut controller = driver.controller;
        controller.shutdown();
        info!(
            "event=runtime_stop module=runtime status=ok dropped_in_flight={}",
            driver.in_flight.len()
        );
        controller
    }
}

struct Driver<G: TaskGateway + 'static> {
    controller: SyncController<G>,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    outcomes: mpsc::Sender<CommandOutcome>,
}

impl<G: TaskGateway + 'static> Driver<G> {
    fn handle_command(&mut self, command: Command) {
        let name = command.name();
        debug!("event=command module=runtime command={name}");
        match command {
            Command::SelectProject(selection) => {
                let ticket = self.controller.select(selection);
                self.fetch_tasks(ticket);
            }
            Command::CreateProject { name: project_name, description } => {
                match self.controller.prepare_create_project(project_name, description) {
                    Ok(input) => {
                        let gateway = self.controller.gateway();
                        self.in_flight.push(Box::pin(async move {
                            let result = gateway.create_project(&input).await;
                            Completion::ProjectCreated(input, result)
                        }));
                    }
                    Err(err) => self.report(name, Err(err)),
                }
            }
            Command::CreateTask {
                title,
                description,
                project_id,
            } => match self
                .controller
                .prepare_create_task(title, description, project_id)
            {
                Ok(input) => {
                    let gateway = self.controller.gateway();
                    self.in_flight.push(Box::pin(async move {
                        let result = gateway.create_task(&input).await;
                        Completion::TaskCreated(input, result)
                    }));
                }
                Err(err) => self.report(name, Err(err)),
            },
            Command::UpdateTaskStatus { task_id, status } => {
                let gateway = self.controller.gateway();
                self.in_flight.push(Box::pin(async move {
                    let result = gateway.update_task_status(task_id, status).await;
                    Completion::StatusUpdated(task_id, status, result)
                }));
            }
            Command::Reload => self.reload(),
            Command::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Projects(ticket, result) => {
                let _ = self.controller.finish_project_load(ticket, result);
            }
            Completion::Tasks(ticket, result) => {
                let _ = self.controller.finish_task_load(ticket, result);
            }
            Completion::ProjectCreated(input, result) => {
                match self.controller.complete_create_project(&input, result) {
                    Ok(ticket) => {
                        self.fetch_projects(ticket);
                        self.report("create_project", Ok(()));
                    }
                    Err(err) => self.report("create_project", Err(err)),
                }
            }
            Completion::TaskCreated(input, result) => {
                match self.controller.complete_create_task(&input, result) {
                    Ok(ticket) => {
                        self.fetch_tasks(ticket);
                        self.report("create_task", Ok(()));
                    }
                    Err(err) => self.report("create_task", Err(err)),
                }
            }
            Completion::StatusUpdated(task_id, status, result) => {
                match self
                    .controller
                    .complete_update_task_status(task_id, status, result)
                {
                    Ok(ticket) => {
                        self.fetch_tasks(ticket);
                        self.report("update_task_status", Ok(()));
                    }
                    Err(err) => self.report("update_task_status", Err(err)),
                }
            }
        }
    }

    fn reload(&mut self) {
        let ticket = self.controller.begin_project_load();
        self.fetch_projects(ticket);
        self.reload_tasks();
    }

    fn reload_tasks(&mut self) {
        let ticket = self.controller.begin_task_load();
        self.fetch_tasks(ticket);
    }

    fn fetch_projects(&mut self, ticket: ProjectLoadTicket) {
        let gateway: Arc<G> = self.controller.gateway();
        self.in_flight.push(Box::pin(async move {
            let result = gateway.fetch_projects().await;
            Completion::Projects(ticket, result)
        }));
    }

    fn fetch_tasks(&mut self, ticket: TaskLoadTicket) {
        let gateway: Arc<G> = self.controller.gateway();
        self.in_flight.push(Box::pin(async move {
            let result = gateway.fetch_tasks(ticket.selection()).await;
            Completion::Tasks(ticket, result)
        }));
    }

    fn report(&self, command: &'static str, result: Result<(), SyncError>) {
        match self.outcomes.try_send(CommandOutcome { command, result }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(
                "event=command_outcome module=runtime status=dropped reason=buffer_full command={command}"
            ),
            Err(TrySendError::Closed(_)) => debug!(
                "event=command_outcome module=runtime status=dropped reason=handle_closed command={command}"
            ),
        }
    }
}

async fn next_push_event(events: &mut Option<mpsc::Receiver<PushEvent>>) -> Option<PushEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Next channel state, or `None` once the channel is gone.
async fn next_channel_state(
    state: &mut Option<watch::Receiver<ChannelState>>,
) -> Option<ChannelState> {
    match state {
        Some(state) => match state.changed().await {
            Ok(()) => Some(*state.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
