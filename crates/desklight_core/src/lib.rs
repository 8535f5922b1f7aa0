//! Client core for the desklight task board.
//! Owns the local view of projects and tasks and keeps it in sync with the
//! server through REST fetches and a push subscription.

pub mod config;
pub mod controller;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod notify;
pub mod push;
pub mod runtime;

pub use config::{ClientConfig, ConfigError};
pub use controller::{LoadOutcome, SyncController, SyncError, ViewSnapshot};
pub use gateway::{Ack, GatewayError, GatewayResult, HttpGateway, TaskGateway};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::project::{NewProject, Project, ProjectId};
pub use model::task::{NewTask, Task, TaskId, TaskStatus};
pub use model::ValidationError;
pub use notify::{Notification, NotificationId, NotificationQueue};
pub use push::{decode_push_payload, ChannelState, PushChannel, PushEvent, PushHandle};
pub use runtime::{Command, CommandOutcome, Runtime, RuntimeClosed, RuntimeHandle, OUTCOME_BUFFER};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
