//! Remote data gateway contracts and REST implementation.
//!
//! # Responsibility
//! - Define the request/response contract the controller depends on.
//! - Map transport and server failures onto one error type.
//!
//! # Invariants
//! - Each operation is exactly one request/response exchange.
//! - Failures are returned as `Err(GatewayError)`; nothing is retried here.

pub mod http;

use crate::model::project::{NewProject, Project, ProjectId};
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use http::HttpGateway;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Uniform failure signal for REST calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection, timeout or I/O failure before a response arrived.
    Transport(String),
    /// Server answered with a non-success status.
    Server { status: u16, body: String },
    /// Success response whose body could not be decoded.
    Decode(String),
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport error: {message}"),
            Self::Server { status, body } if body.is_empty() => {
                write!(f, "server error: status {status}")
            }
            Self::Server { status, body } => write!(f, "server error: status {status}: {body}"),
            Self::Decode(message) => write!(f, "response decode error: {message}"),
        }
    }
}

impl Error for GatewayError {}

/// Acknowledgement of an accepted mutation.
///
/// The created/updated entity in the response body is not used; state is
/// reconciled by a follow-up fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

/// Request/response access to projects and tasks.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    async fn fetch_projects(&self) -> GatewayResult<Vec<Project>>;

    /// Lists tasks of one project, or all tasks when `project_id` is `None`.
    async fn fetch_tasks(&self, project_id: Option<ProjectId>) -> GatewayResult<Vec<Task>>;

    async fn create_project(&self, input: &NewProject) -> GatewayResult<Ack>;

    async fn create_task(&self, input: &NewTask) -> GatewayResult<Ack>;

    async fn update_task_status(&self, task_id: TaskId, status: TaskStatus)
        -> GatewayResult<Ack>;
}
