//! Billing service
//!
//! REST API for project deployment, plan management and subscriber checkout

use anyhow::{Context, Result};
use billing_service::{
    create_router,
    storage::{DocumentStore, MemoryStore, RedisStore},
    tasks::{
        CloudTasksDispatcher, DispatchMode, InlineDispatcher, RedisQueueDispatcher,
        TaskDispatcher,
    },
    worker::Worker,
    AppState, Config, ServiceSettings,
};
use redis::aio::ConnectionManager;
use soroban_client::{Ledger, SorobanClient, SorobanConfig};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "billing_service=debug,soroban_client=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Starting billing service");
    info!("Environment: {}", config.app_env);
    info!("Stellar network: {}", config.stellar_network);
    info!("Soroban RPC: {}", config.soroban_rpc_url);

    // Initialize storage
    let (store, redis_conn): (Arc<dyn DocumentStore>, Option<ConnectionManager>) =
        match config.storage_backend {
            billing_service::config::StorageBackend::Redis => {
                let store = RedisStore::new(&config.redis_url)
                    .await
                    .context("Failed to initialize storage")?;
                let conn = store.connection();
                (Arc::new(store), Some(conn))
            }
            billing_service::config::StorageBackend::Memory => {
                warn!("Using in-memory storage; data is lost on restart");
                (Arc::new(MemoryStore::new()), None)
            }
        };

    // Initialize ledger client
    let mut soroban_config = SorobanConfig::new(
        &config.soroban_rpc_url,
        &config.network_passphrase,
        &config.signer_secret,
    );
    soroban_config.poll_attempts = config.rpc_poll_attempts;
    soroban_config.poll_interval = config.rpc_poll_interval;
    let ledger: Arc<dyn Ledger> =
        Arc::new(SorobanClient::new(soroban_config).context("Failed to create Soroban client")?);

    // Select deployment dispatch
    let mode = DispatchMode::select(config.is_production(), config.task_queue, &config.cloud_tasks);
    let queue_conn = match (&mode, redis_conn) {
        (DispatchMode::RedisQueue, Some(conn)) => Some(conn),
        (DispatchMode::RedisQueue, None) => Some(
            RedisStore::new(&config.redis_url)
                .await
                .context("Failed to connect to Redis queue")?
                .connection(),
        ),
        _ => None,
    };
    info!("Deployment dispatch: {:?}", mode);

    let internal_tasks_token = config.internal_tasks_token.clone();
    let dispatch_conn = queue_conn.clone();
    let state = AppState::new(store, ledger, ServiceSettings::from(&config), move |executor| {
        let dispatcher: Arc<dyn TaskDispatcher> = match (mode, dispatch_conn) {
            (DispatchMode::CloudTasks(target), _) => {
                Arc::new(CloudTasksDispatcher::new(target, internal_tasks_token))
            }
            (DispatchMode::RedisQueue, Some(conn)) => Arc::new(RedisQueueDispatcher::new(conn)),
            _ => Arc::new(InlineDispatcher::new(executor)),
        };
        dispatcher
    });

    // Start the queue worker on its own connection; BLPOP blocks the one it runs on
    if queue_conn.is_some() {
        let conn = RedisStore::new(&config.redis_url)
            .await
            .context("Failed to connect worker to Redis")?
            .connection();
        let mut worker = Worker::new(conn, state.executor.clone());
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("Deployment worker stopped: {:#}", e);
            }
        });
    }

    // Create router
    let app = create_router(state);

    // Bind and serve
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Billing service running on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
