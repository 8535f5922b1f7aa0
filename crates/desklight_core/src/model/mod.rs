//! Domain model shared by the gateway, push channel and controller.
//!
//! # Responsibility
//! - Define the wire-compatible `Project` and `Task` records.
//! - Validate user input before it reaches the network.
//!
//! # Invariants
//! - Identifiers are opaque server-assigned integers; the client never mints them.
//! - Wire field names follow the backend's camel-case JSON.

pub mod project;
pub mod task;

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Rejected command input, detected before any request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Project name is empty after trimming.
    EmptyProjectName,
    /// Task title is empty after trimming.
    EmptyTaskTitle,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyProjectName => write!(f, "project name cannot be empty"),
            Self::EmptyTaskTitle => write!(f, "task title cannot be empty"),
        }
    }
}

impl Error for ValidationError {}

/// Trims optional free text and collapses blank input to `None`.
pub(crate) fn normalize_description(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
