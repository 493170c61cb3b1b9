//! Configuration management for the billing service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use subfy_common::{Network, PaymentCurrency};

/// JWT secret used when none is configured. Refused in production.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

/// Requested task queue; the effective dispatch mode also depends on the
/// environment (see `tasks::DispatchMode::select`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskQueueKind {
    CloudTasks,
    Redis,
    Inline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudTasksSettings {
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub queue: Option<String>,
    pub target_url: Option<String>,
    pub invoker_service_account_email: Option<String>,
}

/// Fully specified Cloud Tasks queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudTasksTarget {
    pub project_id: String,
    pub location: String,
    pub queue: String,
    pub target_url: String,
    pub invoker_service_account_email: Option<String>,
}

impl CloudTasksTarget {
    pub fn queue_path(&self) -> String {
        format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue
        )
    }
}

impl CloudTasksSettings {
    /// `None` unless project, location, queue and target URL are all set.
    pub fn target(&self) -> Option<CloudTasksTarget> {
        Some(CloudTasksTarget {
            project_id: self.project_id.clone()?,
            location: self.location.clone()?,
            queue: self.queue.clone()?,
            target_url: self.target_url.clone()?,
            invoker_service_account_email: self.invoker_service_account_email.clone(),
        })
    }
}

/// Payment token contract defaults, from most to least specific.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentTokenConfig {
    pub scoped: HashMap<(Network, PaymentCurrency), String>,
    pub generic: HashMap<PaymentCurrency, String>,
    pub global: Option<String>,
}

impl PaymentTokenConfig {
    /// Network+currency default, falling back to the currency default.
    pub fn for_network(&self, network: Network, currency: PaymentCurrency) -> Option<String> {
        self.scoped
            .get(&(network, currency))
            .or_else(|| self.generic.get(&currency))
            .cloned()
    }

    /// Full chain ending with the global default.
    pub fn resolve(&self, network: Network, currency: PaymentCurrency) -> Option<String> {
        self.for_network(network, currency)
            .or_else(|| self.global.clone())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// `production` enables queued deployment dispatch
    pub app_env: String,

    pub storage_backend: StorageBackend,

    /// Redis connection URL (store and redis queue)
    pub redis_url: String,

    /// Soroban RPC endpoint
    pub soroban_rpc_url: String,

    pub stellar_network: Network,

    pub network_passphrase: String,

    /// Backend signer secret seed
    pub signer_secret: String,

    pub rpc_poll_attempts: u32,

    pub rpc_poll_interval: Duration,

    pub jwt_secret: String,

    pub internal_tasks_token: Option<String>,

    pub wasm_releases_internal_token: Option<String>,

    pub task_queue: TaskQueueKind,

    pub cloud_tasks: CloudTasksSettings,

    pub payment_tokens: PaymentTokenConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let stellar_network: Network = var("STELLAR_NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()
            .context("Invalid STELLAR_NETWORK")?;

        let storage_backend = match var("STORAGE_BACKEND").as_deref() {
            None | Some("redis") => StorageBackend::Redis,
            Some("memory") => StorageBackend::Memory,
            Some(other) => anyhow::bail!("Invalid STORAGE_BACKEND: {}", other),
        };

        let task_queue = match var("TASK_QUEUE").as_deref() {
            None | Some("cloud-tasks") => TaskQueueKind::CloudTasks,
            Some("redis") => TaskQueueKind::Redis,
            Some("inline") => TaskQueueKind::Inline,
            Some(other) => anyhow::bail!("Invalid TASK_QUEUE: {}", other),
        };

        let mut payment_tokens = PaymentTokenConfig {
            global: var("SB_PAYMENT_TOKEN_CONTRACT_ID"),
            ..Default::default()
        };
        for currency in [PaymentCurrency::Usdc, PaymentCurrency::Eurc] {
            let base = format!("SB_PAYMENT_TOKEN_{}_CONTRACT_ID", currency.as_str());
            if let Some(id) = var(&base) {
                payment_tokens.generic.insert(currency, id);
            }
            for network in [Network::Testnet, Network::Public] {
                if let Some(id) = var(&format!("{}_{}", base, network.env_suffix())) {
                    payment_tokens.scoped.insert((network, currency), id);
                }
            }
        }

        let config = Config {
            api_host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),

            api_port: var("API_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            app_env: var("APP_ENV").unwrap_or_else(|| "development".to_string()),

            storage_backend,

            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),

            soroban_rpc_url: var("SOROBAN_RPC_URL")
                .unwrap_or_else(|| "https://soroban-testnet.stellar.org".to_string()),

            network_passphrase: var("SOROBAN_NETWORK_PASSPHRASE")
                .unwrap_or_else(|| stellar_network.passphrase().to_string()),

            stellar_network,

            signer_secret: var("SB_BACKEND_SIGNER_SECRET")
                .or_else(|| var("STELLAR_SERVER_SECRET"))
                .unwrap_or_default(),

            rpc_poll_attempts: var("RPC_POLL_ATTEMPTS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("Invalid RPC_POLL_ATTEMPTS")?,

            rpc_poll_interval: Duration::from_millis(
                var("RPC_POLL_INTERVAL_MS")
                    .unwrap_or_else(|| "1000".to_string())
                    .parse()
                    .context("Invalid RPC_POLL_INTERVAL_MS")?,
            ),

            jwt_secret: var("JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.to_string()),

            internal_tasks_token: var("INTERNAL_TASKS_TOKEN"),

            wasm_releases_internal_token: var("WASM_RELEASES_INTERNAL_TOKEN"),

            task_queue,

            cloud_tasks: CloudTasksSettings {
                project_id: var("CLOUD_TASKS_PROJECT_ID").or_else(|| var("GOOGLE_CLOUD_PROJECT")),
                location: var("CLOUD_TASKS_LOCATION"),
                queue: var("CLOUD_TASKS_QUEUE"),
                target_url: var("CLOUD_TASKS_TARGET_URL"),
                invoker_service_account_email: var("CLOUD_TASKS_INVOKER_SERVICE_ACCOUNT_EMAIL"),
            },

            payment_tokens,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.rpc_poll_attempts == 0 {
            anyhow::bail!("RPC_POLL_ATTEMPTS must be greater than 0");
        }

        if self.signer_secret.is_empty() {
            anyhow::bail!("SB_BACKEND_SIGNER_SECRET or STELLAR_SERVER_SECRET is required");
        }

        if self.is_production() && self.jwt_secret == DEV_JWT_SECRET {
            anyhow::bail!("JWT_SECRET must be set in production");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}
