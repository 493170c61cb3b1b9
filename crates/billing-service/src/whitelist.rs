//! Early-access email whitelist

use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{AddEmailResponse, WhitelistStats, WhitelistStatsEntry};
use crate::records::Whitelist;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

#[derive(Clone)]
pub struct WhitelistService {
    whitelist: Whitelist,
    /// Serializes the duplicate check with the insert.
    adding: Arc<Mutex<()>>,
}

impl WhitelistService {
    pub fn new(whitelist: Whitelist) -> Self {
        Self {
            whitelist,
            adding: Arc::new(Mutex::new(())),
        }
    }

    /// Add an address, normalized to trimmed lowercase. A duplicate is not an
    /// error: it is reported with `success: false`.
    pub async fn add_email(&self, email: Option<&Value>) -> ServiceResult<AddEmailResponse> {
        let email = email
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ServiceError::bad_request("Email is required."))?;
        if !EMAIL.is_match(email) {
            return Err(ServiceError::bad_request(
                "Please provide a valid email address.",
            ));
        }
        let email = email.to_lowercase();

        let _guard = self.adding.lock().await;
        if self.whitelist.contains(&email).await? {
            return Ok(AddEmailResponse {
                success: false,
                message: "This email is already on the whitelist.".to_string(),
            });
        }
        let entry = self.whitelist.add(&email).await?;
        info!("Whitelist entry {} added", entry.id);

        Ok(AddEmailResponse {
            success: true,
            message: "You have been added to the whitelist!".to_string(),
        })
    }

    /// Entry ids and signup times, newest first. Addresses are not exposed.
    pub async fn stats(&self) -> ServiceResult<WhitelistStats> {
        let entries: Vec<WhitelistStatsEntry> = self
            .whitelist
            .list()
            .await?
            .into_iter()
            .map(|entry| WhitelistStatsEntry {
                id: entry.id,
                created_at: entry.created_at,
            })
            .collect();
        Ok(WhitelistStats {
            total: entries.len(),
            entries,
        })
    }
}
