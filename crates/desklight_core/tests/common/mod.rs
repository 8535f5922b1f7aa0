#![allow(dead_code)]

use async_trait::async_trait;
use desklight_core::{
    Ack, GatewayError, GatewayResult, NewProject, NewTask, Project, ProjectId, Task, TaskGateway,
    TaskId, TaskStatus,
};
use desklight_core::model::task::ProjectRef;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchProjects,
    FetchTasks(Option<ProjectId>),
    CreateProject(String),
    CreateTask(String, Option<ProjectId>),
    UpdateStatus(TaskId, TaskStatus),
}

#[derive(Default)]
struct ServerState {
    projects: Vec<Project>,
    tasks: Vec<Task>,
    failure: Option<GatewayError>,
    calls: Vec<Call>,
    next_id: i64,
}

/// In-memory server that behaves like the REST backend.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<ServerState>,
}

impl FakeGateway {
    pub fn new(projects: Vec<Project>, tasks: Vec<Task>) -> Self {
        let next_id = projects
            .iter()
            .map(|p| p.id.0)
            .chain(tasks.iter().map(|t| t.id.0))
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            state: Mutex::new(ServerState {
                projects,
                tasks,
                next_id,
                ..ServerState::default()
            }),
        }
    }

    /// Every following call fails with `error` until cleared.
    pub fn fail_with(&self, error: Option<GatewayError>) {
        self.state.lock().unwrap().failure = error;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn server_tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn put_task(&self, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.tasks.retain(|t| t.id != task.id);
        state.tasks.push(task);
    }

    fn record(&self, call: Call) -> Result<std::sync::MutexGuard<'_, ServerState>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failure.clone() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl TaskGateway for FakeGateway {
    async fn fetch_projects(&self) -> GatewayResult<Vec<Project>> {
        let state = self.record(Call::FetchProjects)?;
        Ok(state.projects.clone())
    }

    async fn fetch_tasks(&self, project_id: Option<ProjectId>) -> GatewayResult<Vec<Task>> {
        let state = self.record(Call::FetchTasks(project_id))?;
        Ok(state
            .tasks
            .iter()
            .filter(|task| task.matches_selection(project_id))
            .cloned()
            .collect())
    }

    async fn create_project(&self, input: &NewProject) -> GatewayResult<Ack> {
        let mut state = self.record(Call::CreateProject(input.name.clone()))?;
        let id = ProjectId(state.next_id);
        state.next_id += 1;
        state.projects.push(Project {
            id,
            name: input.name.clone(),
            description: input.description.clone(),
        });
        Ok(Ack { status: 201 })
    }

    async fn create_task(&self, input: &NewTask) -> GatewayResult<Ack> {
        let mut state = self.record(Call::CreateTask(input.title.clone(), input.project_id))?;
        let id = TaskId(state.next_id);
        state.next_id += 1;
        state.tasks.push(Task {
            id,
            title: input.title.clone(),
            description: input.description.clone(),
            status: TaskStatus::Todo,
            project: input.project_id.map(|id| ProjectRef { id }),
        });
        Ok(Ack { status: 201 })
    }

    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus) -> GatewayResult<Ack> {
        let mut state = self.record(Call::UpdateStatus(task_id, status))?;
        match state.tasks.iter_mut().find(|task| task.id == task_id) {
            Some(task) => {
                task.status = status;
                Ok(Ack { status: 200 })
            }
            None => Err(GatewayError::Server {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

pub fn project(id: i64, name: &str) -> Project {
    Project {
        id: ProjectId(id),
        name: name.to_string(),
        description: None,
    }
}

pub fn task(id: i64, title: &str, project_id: Option<i64>) -> Task {
    Task {
        id: TaskId(id),
        title: title.to_string(),
        description: None,
        status: TaskStatus::Todo,
        project: project_id.map(|id| ProjectRef { id: ProjectId(id) }),
    }
}

pub fn titles(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|task| task.title.as_str()).collect()
}
