//! Task records, status values and creation input.
//!
//! # Invariants
//! - A task belongs to exactly one project or none.
//! - `TaskStatus` wire values are `TODO | IN_PROGRESS | DONE`.

use super::project::ProjectId;
use super::{normalize_description, ValidationError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

/// Server-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(Self)
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created but not started.
    Todo,
    /// Work is in progress.
    InProgress,
    /// Completed.
    Done,
}

impl TaskStatus {
    /// Stable wire value, also used as the raw `PATCH` body.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "TODO",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown task status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTaskStatusError(pub String);

impl Display for ParseTaskStatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported task status `{}`; expected TODO|IN_PROGRESS|DONE",
            self.0
        )
    }
}

impl Error for ParseTaskStatusError {}

impl FromStr for TaskStatus {
    type Err = ParseTaskStatusError;

    /// Accepts wire values case-insensitively, with `-` or space as separators.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "TODO" => Ok(Self::Todo),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "DONE" => Ok(Self::Done),
            _ => Err(ParseTaskStatusError(value.trim().to_string())),
        }
    }
}

/// Reference to the owning project.
///
/// The backend embeds the full project object; only `id` is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: ProjectId,
}

/// Task as listed by the REST API and carried by push upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub project: Option<ProjectRef>,
}

impl Task {
    /// Returns the owning project id, if any.
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project.map(|project| project.id)
    }

    /// Returns whether this task is visible under `selection`.
    ///
    /// `None` selects every task.
    pub fn matches_selection(&self, selection: Option<ProjectId>) -> bool {
        match selection {
            Some(selected) => self.project_id() == Some(selected),
            None => true,
        }
    }
}

/// Validated input for `create_task`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<ProjectId>,
}

impl NewTask {
    /// Builds creation input, trimming the title and blank descriptions.
    ///
    /// # Errors
    /// - Returns `ValidationError::EmptyTaskTitle` when `title` is blank.
    pub fn new(
        title: impl Into<String>,
        description: Option<String>,
        project_id: Option<ProjectId>,
    ) -> Result<Self, ValidationError> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(ValidationError::EmptyTaskTitle);
        }
        Ok(Self {
            title,
            description: normalize_description(description),
            project_id,
        })
    }
}
