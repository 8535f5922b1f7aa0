//! Plain-text rendering of view snapshots.

use desklight_core::{Project, Task, ViewSnapshot};
use std::fmt::Write;

pub fn render_projects(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "no projects".to_string();
    }
    let mut out = String::new();
    for project in projects {
        let _ = write!(out, "  [{}] {}", project.id, project.name);
        if let Some(description) = &project.description {
            let _ = write!(out, " - {description}");
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

pub fn render_tasks(snapshot: &ViewSnapshot) -> String {
    let scope = match snapshot.selection {
        Some(id) => snapshot
            .projects
            .iter()
            .find(|project| project.id == id)
            .map(|project| format!("project {} ({})", project.name, id))
            .unwrap_or_else(|| format!("project {id}")),
        None => "all projects".to_string(),
    };
    let mut out = format!("tasks in {scope}:");
    if snapshot.tasks.is_empty() {
        out.push_str(" none");
        return out;
    }
    for task in &snapshot.tasks {
        out.push('\n');
        out.push_str(&render_task(task));
    }
    out
}

fn render_task(task: &Task) -> String {
    let mut line = format!(
        "  #{:<4} {:<12} {}",
        task.id.0,
        task.status.as_str(),
        task.title
    );
    if let Some(project) = task.project_id() {
        let _ = write!(line, "  @{project}");
    }
    if let Some(description) = &task.description {
        let _ = write!(line, "  ({description})");
    }
    line
}

/// Lines worth printing when the view moved from `previous` to `current`.
pub fn render_changes(previous: &ViewSnapshot, current: &ViewSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    if previous.projects != current.projects {
        lines.push(format!("projects:\n{}", render_projects(&current.projects)));
    }
    if previous.tasks != current.tasks || previous.selection != current.selection {
        lines.push(render_tasks(current));
    }
    for notification in &current.notifications {
        if !previous.notifications.iter().any(|n| n.id == notification.id) {
            lines.push(format!("* {}", notification.message));
        }
    }
    lines
}
