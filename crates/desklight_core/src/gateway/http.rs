//! reqwest-backed `TaskGateway`.

use super::{Ack, GatewayError, GatewayResult, TaskGateway};
use crate::config::ClientConfig;
use crate::model::project::{NewProject, Project, ProjectId};
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const PROJECTS_PATH: &str = "/api/projects";
const TASKS_PATH: &str = "/api/tasks";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// REST client for the task backend.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    description: Option<&'a str>,
}

#[derive(Serialize)]
struct ProjectRefBody {
    id: ProjectId,
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    title: &'a str,
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<ProjectRefBody>,
}

impl HttpGateway {
    /// Creates a gateway rooted at `base_url`.
    ///
    /// # Errors
    /// - Returns `GatewayError::Transport` when the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                GatewayError::Transport(format!("failed to build HTTP client: {err}"))
            })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// Creates a gateway from the client configuration.
    ///
    /// # Errors
    /// - Returns `GatewayError::Transport` when the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> GatewayResult<Self> {
        Self::new(config.api_url.as_str(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(
        &self,
        method: &'static str,
        path: &str,
        request: RequestBuilder,
    ) -> GatewayResult<Response> {
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        debug!(
            "event=gateway_response module=gateway method={method} path={path} status={}",
            status.as_u16()
        );
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Server {
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let response = self
            .send("GET", path, self.client.get(self.url(path)))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }
}

#[async_trait]
impl TaskGateway for HttpGateway {
    async fn fetch_projects(&self) -> GatewayResult<Vec<Project>> {
        self.get_json(PROJECTS_PATH).await
    }

    async fn fetch_tasks(&self, project_id: Option<ProjectId>) -> GatewayResult<Vec<Task>> {
        self.get_json(&tasks_path(project_id)).await
    }

    async fn create_project(&self, input: &NewProject) -> GatewayResult<Ack> {
        let body = CreateProjectBody {
            name: input.name.as_str(),
            description: input.description.as_deref(),
        };
        let request = self.client.post(self.url(PROJECTS_PATH)).json(&body);
        let response = self.send("POST", PROJECTS_PATH, request).await?;
        Ok(ack(&response))
    }

    async fn create_task(&self, input: &NewTask) -> GatewayResult<Ack> {
        let body = CreateTaskBody {
            title: input.title.as_str(),
            description: input.description.as_deref(),
            project: input.project_id.map(|id| ProjectRefBody { id }),
        };
        let request = self.client.post(self.url(TASKS_PATH)).json(&body);
        let response = self.send("POST", TASKS_PATH, request).await?;
        Ok(ack(&response))
    }

    async fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> GatewayResult<Ack> {
        let path = status_path(task_id);
        let request = self
            .client
            .patch(self.url(&path))
            .header(CONTENT_TYPE, "text/plain")
            .body(status.as_str());
        let response = self.send("PATCH", &path, request).await?;
        Ok(ack(&response))
    }
}

fn tasks_path(project_id: Option<ProjectId>) -> String {
    match project_id {
        Some(id) => format!("{TASKS_PATH}/project/{id}"),
        None => TASKS_PATH.to_string(),
    }
}

fn status_path(task_id: TaskId) -> String {
    format!("{TASKS_PATH}/{task_id}/status")
}

fn ack(response: &Response) -> Ack {
    Ack {
        status: response.status().as_u16(),
    }
}

fn map_request_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::Decode(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let mut truncated = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        truncated.push_str("...");
    }
    truncated
}
