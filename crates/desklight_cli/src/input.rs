//! Line-oriented command parsing for the terminal front end.

use desklight_core::{Command, ProjectId, TaskId, TaskStatus};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const HELP: &str = "\
commands:
  projects                                  list projects
  tasks                                     list tasks for the current selection
  select <project-id|all>                   filter tasks by project
  project <name> [| description]            create a project
  task <project-id|-> <title> [| description]
                                            create a task (`-` for no project)
  status <task-id> <TODO|IN_PROGRESS|DONE>  change a task's status
  reload                                    refetch projects and tasks
  help                                      show this text
  quit                                      exit";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Help,
    Quit,
    ShowProjects,
    ShowTasks,
    Run(Command),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError(pub String);

impl Display for InputError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for InputError {}

/// Parses one line typed by the user.
///
/// # Errors
/// - Returns `InputError` with a usage hint for unknown or incomplete input.
pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Ok(Input::Empty),
        "help" | "?" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        "projects" => Ok(Input::ShowProjects),
        "tasks" => Ok(Input::ShowTasks),
        "reload" => Ok(Input::Run(Command::Reload)),
        "select" => parse_select(rest),
        "project" => parse_project(rest),
        "task" => parse_task(rest),
        "status" => parse_status(rest),
        other => Err(InputError(format!(
            "unknown command `{other}`; type `help` for a list"
        ))),
    }
}

fn parse_select(rest: &str) -> Result<Input, InputError> {
    match rest {
        "" => Err(usage("select <project-id|all>")),
        "all" | "*" => Ok(Input::Run(Command::SelectProject(None))),
        raw => raw
            .parse::<ProjectId>()
            .map(|id| Input::Run(Command::SelectProject(Some(id))))
            .map_err(|_| InputError(format!("`{raw}` is not a project id"))),
    }
}

fn parse_project(rest: &str) -> Result<Input, InputError> {
    let (name, description) = split_description(rest);
    if name.is_empty() {
        return Err(usage("project <name> [| description]"));
    }
    Ok(Input::Run(Command::CreateProject {
        name: name.to_string(),
        description,
    }))
}

fn parse_task(rest: &str) -> Result<Input, InputError> {
    let Some((target, remainder)) = rest.split_once(char::is_whitespace) else {
        return Err(usage("task <project-id|-> <title> [| description]"));
    };
    let project_id = match target {
        "-" => None,
        raw => Some(
            raw.parse::<ProjectId>()
                .map_err(|_| InputError(format!("`{raw}` is not a project id")))?,
        ),
    };
    let (title, description) = split_description(remainder);
    if title.is_empty() {
        return Err(usage("task <project-id|-> <title> [| description]"));
    }
    Ok(Input::Run(Command::CreateTask {
        title: title.to_string(),
        description,
        project_id,
    }))
}

fn parse_status(rest: &str) -> Result<Input, InputError> {
    let mut parts = rest.split_whitespace();
    let (Some(raw_id), Some(raw_status), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(usage("status <task-id> <TODO|IN_PROGRESS|DONE>"));
    };
    let task_id = raw_id
        .parse::<TaskId>()
        .map_err(|_| InputError(format!("`{raw_id}` is not a task id")))?;
    let status = raw_status
        .parse::<TaskStatus>()
        .map_err(|err| InputError(err.to_string()))?;
    Ok(Input::Run(Command::UpdateTaskStatus { task_id, status }))
}

/// Splits `head | description`; the description is optional.
fn split_description(value: &str) -> (&str, Option<String>) {
    match value.split_once('|') {
        Some((head, description)) => (head.trim(), Some(description.trim().to_string())),
        None => (value.trim(), None),
    }
}

fn usage(form: &str) -> InputError {
    InputError(format!("usage: {form}"))
}
