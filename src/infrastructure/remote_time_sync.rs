use crate::domain::models::TaskIdentity;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

/// Authoritative store of each task's total logged seconds.
#[async_trait]
pub trait RemoteTimeSync: Send + Sync {
    async fn fetch_task_total_time(&self, task: &TaskIdentity) -> Result<f64, InfraError>;

    async fn update_task_total_time(
        &self,
        task: &TaskIdentity,
        total_seconds: f64,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskTimePayload {
    #[serde(rename = "totalTimeLogged")]
    total_time_logged: Option<f64>,
}

/// Talks to the task document endpoint of the remote store:
/// `{base}/projects/{project}/tasks/{task}`, or `{base}/tasks/{task}` for tasks
/// without a project.
#[derive(Debug, Clone)]
pub struct ReqwestRemoteTimeSync {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl ReqwestRemoteTimeSync {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid remote base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(
                "remote base url cannot be a base".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            auth_token: auth_token
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        })
    }

    fn task_endpoint(&self, task: &TaskIdentity) -> Result<Url, InfraError> {
        let task_id = task.task_id.trim();
        if task_id.is_empty() {
            return Err(InfraError::Remote("task id must not be empty".to_string()));
        }

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Remote("remote base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            if let Some(project_id) = task
                .project_id
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
            {
                segments.push("projects");
                segments.push(project_id);
            }
            segments.push("tasks");
            segments.push(task_id);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        if body.trim().is_empty() {
            InfraError::Remote(format!("remote store error: http {}", status.as_u16()))
        } else {
            InfraError::Remote(format!(
                "remote store error: http {}; body={body}",
                status.as_u16()
            ))
        }
    }
}

fn parse_total_time(body: &str) -> Result<f64, InfraError> {
    let parsed: TaskTimePayload = serde_json::from_str(body)
        .map_err(|error| InfraError::Remote(format!("invalid task payload: {error}; body={body}")))?;
    let total = parsed.total_time_logged.unwrap_or(0.0);
    if !total.is_finite() || total < 0.0 {
        return Err(InfraError::Remote(format!(
            "task payload carried an unusable total: {total}"
        )));
    }
    Ok(total)
}

#[async_trait]
impl RemoteTimeSync for ReqwestRemoteTimeSync {
    async fn fetch_task_total_time(&self, task: &TaskIdentity) -> Result<f64, InfraError> {
        let endpoint = self.task_endpoint(task)?;
        let response = self
            .authorize(self.client.get(endpoint))
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while fetching task time: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading task response: {error}")))?;

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(InfraError::NotFound(format!("task {}", task.task_id)));
        }
        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        parse_total_time(&body)
    }

    async fn update_task_total_time(
        &self,
        task: &TaskIdentity,
        total_seconds: f64,
    ) -> Result<(), InfraError> {
        if !total_seconds.is_finite() || total_seconds < 0.0 {
            return Err(InfraError::Remote(format!(
                "refusing to write unusable total: {total_seconds}"
            )));
        }

        let endpoint = self.task_endpoint(task)?;
        let payload = TaskTimePayload {
            total_time_logged: Some(total_seconds),
        };
        let response = self
            .authorize(self.client.patch(endpoint))
            .json(&payload)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while updating task time: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::http_error(status, &body));
        }
        Ok(())
    }
}

/// Used when no remote store is configured: every call fails, so timers run on
/// local state alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemoteTimeSync;

#[async_trait]
impl RemoteTimeSync for OfflineRemoteTimeSync {
    async fn fetch_task_total_time(&self, _task: &TaskIdentity) -> Result<f64, InfraError> {
        Err(InfraError::Remote("remote store is not configured".to_string()))
    }

    async fn update_task_total_time(
        &self,
        _task: &TaskIdentity,
        _total_seconds: f64,
    ) -> Result<(), InfraError> {
        Err(InfraError::Remote("remote store is not configured".to_string()))
    }
}
