//! Deployment worker - drains the Redis deployment queue

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info};

use crate::deployments::DeploymentExecutor;
use crate::models::DeployTaskPayload;
use crate::tasks::DEPLOY_QUEUE;

pub struct Worker {
    conn: ConnectionManager,
    executor: DeploymentExecutor,
}

impl Worker {
    pub fn new(conn: ConnectionManager, executor: DeploymentExecutor) -> Self {
        Self { conn, executor }
    }

    /// Pop the next payload, waiting at most `timeout_secs`.
    async fn pop_task(&mut self, timeout_secs: f64) -> Result<Option<DeployTaskPayload>> {
        let result: Option<(String, String)> = self.conn.blpop(DEPLOY_QUEUE, timeout_secs).await?;

        match result {
            Some((_, json)) => {
                let payload =
                    serde_json::from_str(&json).context("Failed to deserialize task payload")?;
                debug!("Popped deployment task: {}", json);
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Start the worker loop
    pub async fn run(&mut self) -> Result<()> {
        info!("Deployment worker started, waiting for tasks...");

        loop {
            // 5 second timeout keeps the loop responsive to shutdown
            match self.pop_task(5.0).await {
                Ok(Some(payload)) => {
                    if let Err(e) = self.executor.execute_task(&payload).await {
                        error!(
                            "Failed to record deployment {} outcome: {:#}",
                            payload.deployment_id, e
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error popping deployment task: {:#}", e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
