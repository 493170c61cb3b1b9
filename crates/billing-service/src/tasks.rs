//! Deployment task dispatch
//!
//! A submitted deployment runs either inline (development, or when no queue
//! is configured), through a Google Cloud Tasks HTTP callback, or through a
//! Redis list consumed by the in-process worker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{CloudTasksSettings, CloudTasksTarget, TaskQueueKind};
use crate::deployments::DeploymentExecutor;
use crate::models::DeployTaskPayload;

/// Redis list holding pending deployment payloads.
pub const DEPLOY_QUEUE: &str = "deploy:queue";

const CLOUD_TASKS_API: &str = "https://cloudtasks.googleapis.com/v2";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Hand off a deployment. Returns the queue task name, or `None` when the
    /// task already ran inline.
    async fn enqueue(&self, payload: DeployTaskPayload) -> Result<Option<String>>;
}

/// How deployment tasks are dispatched in this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    CloudTasks(CloudTasksTarget),
    RedisQueue,
}

impl DispatchMode {
    pub fn select(is_production: bool, queue: TaskQueueKind, cloud: &CloudTasksSettings) -> Self {
        if !is_production {
            info!("Development mode: deployment tasks run inline");
            return DispatchMode::Inline;
        }

        match queue {
            TaskQueueKind::CloudTasks => match cloud.target() {
                Some(target) => DispatchMode::CloudTasks(target),
                None => {
                    warn!("Cloud Tasks configuration incomplete, falling back to inline execution");
                    DispatchMode::Inline
                }
            },
            TaskQueueKind::Redis => DispatchMode::RedisQueue,
            TaskQueueKind::Inline => DispatchMode::Inline,
        }
    }
}

/// Runs the task before returning.
pub struct InlineDispatcher {
    executor: DeploymentExecutor,
}

impl InlineDispatcher {
    pub fn new(executor: DeploymentExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TaskDispatcher for InlineDispatcher {
    async fn enqueue(&self, payload: DeployTaskPayload) -> Result<Option<String>> {
        self.executor.execute_task(&payload).await?;
        Ok(None)
    }
}

/// Pushes payloads onto [`DEPLOY_QUEUE`] for the worker.
pub struct RedisQueueDispatcher {
    conn: ConnectionManager,
}

impl RedisQueueDispatcher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TaskDispatcher for RedisQueueDispatcher {
    async fn enqueue(&self, payload: DeployTaskPayload) -> Result<Option<String>> {
        let json = serde_json::to_string(&payload).context("Failed to serialize task payload")?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .rpush(DEPLOY_QUEUE, json)
            .await
            .context("Failed to push deployment task")?;

        info!("Pushed deployment {} to {}", payload.deployment_id, DEPLOY_QUEUE);
        Ok(Some(format!("{}:{}", DEPLOY_QUEUE, payload.deployment_id)))
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    name: Option<String>,
}

/// Creates an HTTP task that POSTs the payload back to this service.
pub struct CloudTasksDispatcher {
    http: reqwest::Client,
    target: CloudTasksTarget,
    internal_token: Option<String>,
}

impl CloudTasksDispatcher {
    pub fn new(target: CloudTasksTarget, internal_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            target,
            internal_token,
        }
    }

    /// Access token of the runtime service account.
    async fn access_token(&self) -> Result<String> {
        let token: MetadataToken = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to reach metadata server")?
            .error_for_status()
            .context("Metadata server rejected token request")?
            .json()
            .await
            .context("Invalid metadata token response")?;
        Ok(token.access_token)
    }

    /// `httpRequest` part of the task.
    pub fn http_request(&self, payload: &DeployTaskPayload) -> Result<serde_json::Value> {
        let body = serde_json::to_vec(payload).context("Failed to serialize task payload")?;
        let mut headers = json!({ "Content-Type": "application/json" });
        let mut request = json!({
            "httpMethod": "POST",
            "url": self.target.target_url,
            "body": STANDARD.encode(body),
        });

        if let Some(email) = &self.target.invoker_service_account_email {
            request["oidcToken"] = json!({ "serviceAccountEmail": email });
        } else if let Some(token) = &self.internal_token {
            headers["Authorization"] = json!(format!("Bearer {}", token));
        }
        request["headers"] = headers;
        Ok(request)
    }
}

#[async_trait]
impl TaskDispatcher for CloudTasksDispatcher {
    async fn enqueue(&self, payload: DeployTaskPayload) -> Result<Option<String>> {
        let url = format!("{}/{}/tasks", CLOUD_TASKS_API, self.target.queue_path());
        let body = json!({ "task": { "httpRequest": self.http_request(&payload)? } });
        let access_token = self.access_token().await?;

        let created: CreatedTask = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .context("Failed to reach Cloud Tasks")?
            .error_for_status()
            .context("Cloud Tasks rejected task")?
            .json()
            .await
            .context("Invalid Cloud Tasks response")?;

        info!(
            "Created Cloud Task for deployment {}: {:?}",
            payload.deployment_id, created.name
        );
        Ok(created.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> CloudTasksSettings {
        CloudTasksSettings {
            project_id: Some("proj".into()),
            location: Some("us-central1".into()),
            queue: Some("deploys".into()),
            target_url: Some("https://api.example.com/internal/tasks/deploy-contract".into()),
            invoker_service_account_email: None,
        }
    }

    fn payload() -> DeployTaskPayload {
        DeployTaskPayload {
            deployment_id: "dep1".into(),
            project_id: "proj1".into(),
        }
    }

    #[test]
    fn test_development_always_inline() {
        for kind in [TaskQueueKind::CloudTasks, TaskQueueKind::Redis, TaskQueueKind::Inline] {
            assert_eq!(
                DispatchMode::select(false, kind, &complete_settings()),
                DispatchMode::Inline
            );
        }
    }

    #[test]
    fn test_production_selection() {
        let settings = complete_settings();
        assert!(matches!(
            DispatchMode::select(true, TaskQueueKind::CloudTasks, &settings),
            DispatchMode::CloudTasks(_)
        ));
        assert_eq!(
            DispatchMode::select(true, TaskQueueKind::Redis, &settings),
            DispatchMode::RedisQueue
        );
        assert_eq!(
            DispatchMode::select(true, TaskQueueKind::Inline, &settings),
            DispatchMode::Inline
        );
    }

    #[test]
    fn test_incomplete_cloud_tasks_falls_back_to_inline() {
        let mut settings = complete_settings();
        settings.queue = None;
        assert_eq!(
            DispatchMode::select(true, TaskQueueKind::CloudTasks, &settings),
            DispatchMode::Inline
        );
    }

    #[test]
    fn test_http_request_uses_bearer_without_invoker() {
        let target = complete_settings().target().unwrap();
        let dispatcher = CloudTasksDispatcher::new(target, Some("tok".into()));
        let request = dispatcher.http_request(&payload()).unwrap();

        assert_eq!(request["headers"]["Authorization"], "Bearer tok");
        assert!(request.get("oidcToken").is_none());
        let body = STANDARD.decode(request["body"].as_str().unwrap()).unwrap();
        let decoded: DeployTaskPayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, payload());
    }

    #[test]
    fn test_http_request_prefers_oidc_invoker() {
        let mut settings = complete_settings();
        settings.invoker_service_account_email = Some("invoker@proj.iam.gserviceaccount.com".into());
        let dispatcher = CloudTasksDispatcher::new(settings.target().unwrap(), Some("tok".into()));
        let request = dispatcher.http_request(&payload()).unwrap();

        assert_eq!(
            request["oidcToken"]["serviceAccountEmail"],
            "invoker@proj.iam.gserviceaccount.com"
        );
        assert!(request["headers"].get("Authorization").is_none());
    }
}
