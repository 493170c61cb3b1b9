//! Subscription billing backend
//!
//! Owners deploy a subscription contract per project, manage plans and run
//! renewals; subscribers get unsigned checkout transactions for their wallet.

pub mod auth;
pub mod billing;
pub mod config;
pub mod deployments;
pub mod error;
pub mod handlers;
pub mod models;
pub mod projects;
pub mod records;
pub mod storage;
pub mod tasks;
pub mod whitelist;
pub mod worker;

use axum::{
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use handlers::{AppState, ServiceSettings};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/auth/challenge", post(handlers::challenge_handler))
        .route("/auth/verify", post(handlers::verify_handler))
        .route("/auth/me", get(handlers::me_handler))
        .route(
            "/projects",
            post(handlers::create_project_handler).get(handlers::list_projects_handler),
        )
        .route(
            "/projects/{project_id}",
            get(handlers::get_project_handler).patch(handlers::rename_project_handler),
        )
        .route(
            "/projects/{project_id}/deployments/prepare",
            post(handlers::prepare_deployment_handler),
        )
        .route(
            "/projects/{project_id}/deployments/submit",
            post(handlers::submit_deployment_handler),
        )
        .route(
            "/deployments/{deployment_id}",
            get(handlers::get_deployment_handler),
        )
        .route(
            "/projects/{project_id}/plans",
            get(handlers::list_plans_handler).post(handlers::create_plan_handler),
        )
        .route(
            "/projects/{project_id}/plans/{plan_id}/status",
            patch(handlers::set_plan_status_handler),
        )
        .route(
            "/projects/{project_id}/subscriptions",
            get(handlers::list_subscriptions_handler),
        )
        .route(
            "/projects/{project_id}/renew-due",
            post(handlers::renew_due_handler),
        )
        .route("/checkout/submit", post(handlers::submit_checkout_handler))
        .route(
            "/checkout/{project_id}",
            get(handlers::checkout_context_handler),
        )
        .route(
            "/checkout/{project_id}/subscribe/prepare",
            post(handlers::prepare_subscribe_handler),
        )
        .route(
            "/checkout/{project_id}/cancel/prepare",
            post(handlers::prepare_cancel_handler),
        )
        .route(
            "/checkout/{project_id}/allowance/prepare",
            post(handlers::prepare_allowance_handler),
        )
        .route(
            "/checkout/{project_id}/allowance/increase-cycles/prepare",
            post(handlers::prepare_increase_cycles_handler),
        )
        .route("/whitelist", post(handlers::add_whitelist_email_handler))
        .route("/whitelist/stats", get(handlers::whitelist_stats_handler))
        .route(
            "/internal/tasks/deploy-contract",
            post(handlers::deploy_task_handler),
        )
        .route(
            "/internal/wasm-releases/register",
            post(handlers::register_release_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
