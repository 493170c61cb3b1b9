//! API request handlers for the billing service

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use soroban_client::{Ledger, PreparedTx, SubmittedTx};
use std::sync::Arc;
use subfy_common::Hash32;
use tracing::info;

use crate::auth::{check_internal_token, AuthService, OwnerIdentity};
use crate::billing::BillingService;
use crate::config::{Config, PaymentTokenConfig};
use crate::deployments::{DeploymentExecutor, DeploymentService};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    AddEmailRequest, AddEmailResponse, ChallengeRequest, ChallengeResponse, CheckoutContext, CheckoutQuery, CreatePlanRequest,
    CreateProjectRequest, DeployTaskPayload, Deployment, IdResponse, IncreaseCyclesResponse,
    OkResponse, PageQuery, PageResponse, Plan, PrepareAllowanceRequest, PrepareCancelRequest,
    PrepareDeploymentResponse, PrepareIncreaseCyclesRequest, PrepareSubscribeRequest, Project,
    RegisterReleaseRequest, RenameProjectRequest, RenewDueReport, SetPlanStatusRequest,
    SubmitDeploymentRequest, SubmitDeploymentResponse, SubmitSignedRequest, Subscription,
    TokenResponse, VerifyRequest, WhitelistStats,
};
use crate::projects::ProjectService;
use crate::records::{Deployments, Projects, Releases, Whitelist};
use crate::storage::DocumentStore;
use crate::tasks::TaskDispatcher;
use crate::whitelist::WhitelistService;

/// Settings the request handlers need from [`Config`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub jwt_secret: String,
    pub payment_tokens: PaymentTokenConfig,
    pub internal_tasks_token: Option<String>,
    pub wasm_releases_internal_token: Option<String>,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            payment_tokens: config.payment_tokens.clone(),
            internal_tasks_token: config.internal_tasks_token.clone(),
            wasm_releases_internal_token: config.wasm_releases_internal_token.clone(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub auth: AuthService,
    pub projects: ProjectService,
    pub billing: BillingService,
    pub deployments: DeploymentService,
    pub executor: DeploymentExecutor,
    pub releases: Releases,
    pub whitelist: WhitelistService,
    pub internal_tasks_token: Option<String>,
    pub wasm_releases_internal_token: Option<String>,
}

impl AppState {
    /// Wire services over one store and ledger. `dispatcher` receives the
    /// executor so inline dispatch can run tasks directly.
    pub fn new<F>(
        store: Arc<dyn DocumentStore>,
        ledger: Arc<dyn Ledger>,
        settings: ServiceSettings,
        dispatcher: F,
    ) -> Self
    where
        F: FnOnce(DeploymentExecutor) -> Arc<dyn TaskDispatcher>,
    {
        let projects = Projects::new(store.clone());
        let deployments = Deployments::new(store.clone());
        let releases = Releases::new(store.clone());
        let whitelist = WhitelistService::new(Whitelist::new(store));

        let executor = DeploymentExecutor::new(
            deployments.clone(),
            projects.clone(),
            releases.clone(),
            ledger.clone(),
            settings.payment_tokens.clone(),
        );
        let dispatcher = dispatcher(executor.clone());

        Self {
            auth: AuthService::new(settings.jwt_secret, ledger.network_passphrase()),
            projects: ProjectService::new(projects.clone()),
            billing: BillingService::new(
                projects.clone(),
                ledger.clone(),
                settings.payment_tokens,
            ),
            deployments: DeploymentService::new(
                deployments,
                projects,
                releases.clone(),
                ledger,
                dispatcher,
            ),
            executor,
            releases,
            whitelist,
            internal_tasks_token: settings.internal_tasks_token,
            wasm_releases_internal_token: settings.wasm_releases_internal_token,
        }
    }
}

type Shared = State<Arc<AppState>>;

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "billing-service"
    }))
}

// ---- Auth ----

pub async fn challenge_handler(
    State(state): Shared,
    Json(payload): Json<ChallengeRequest>,
) -> ServiceResult<Json<ChallengeResponse>> {
    Ok(Json(state.auth.create_challenge(&payload.public_key).await?))
}

pub async fn verify_handler(
    State(state): Shared,
    Json(payload): Json<VerifyRequest>,
) -> ServiceResult<Json<TokenResponse>> {
    if payload.signature.trim().is_empty() {
        return Err(ServiceError::bad_request("signature is required"));
    }
    Ok(Json(
        state
            .auth
            .verify_signature(&payload.public_key, &payload.signature)
            .await?,
    ))
}

pub async fn me_handler(OwnerIdentity(owner): OwnerIdentity) -> impl IntoResponse {
    Json(json!({ "publicKey": owner }))
}

// ---- Projects ----

pub async fn create_project_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Json(payload): Json<CreateProjectRequest>,
) -> ServiceResult<(StatusCode, Json<Project>)> {
    let project = state.projects.create_project(&owner, payload).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
) -> ServiceResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.list_projects(&owner).await?))
}

pub async fn get_project_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
) -> ServiceResult<Json<Project>> {
    Ok(Json(state.projects.get_project(&owner, &project_id).await?))
}

pub async fn rename_project_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
    Json(payload): Json<RenameProjectRequest>,
) -> ServiceResult<Json<Project>> {
    Ok(Json(
        state
            .projects
            .rename_project(&owner, &project_id, payload.name.as_deref())
            .await?,
    ))
}

// ---- Deployments ----

pub async fn prepare_deployment_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
) -> ServiceResult<Json<PrepareDeploymentResponse>> {
    Ok(Json(state.deployments.prepare(&owner, &project_id).await?))
}

pub async fn submit_deployment_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
    Json(payload): Json<SubmitDeploymentRequest>,
) -> ServiceResult<Json<SubmitDeploymentResponse>> {
    info!("Deployment submitted for project {}", project_id);
    Ok(Json(
        state
            .deployments
            .submit(&owner, &project_id, payload)
            .await?,
    ))
}

pub async fn get_deployment_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(deployment_id): Path<String>,
) -> ServiceResult<Json<Deployment>> {
    Ok(Json(
        state.deployments.get_status(&owner, &deployment_id).await?,
    ))
}

// ---- Billing (owner) ----

pub async fn list_plans_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ServiceResult<Json<PageResponse<Plan>>> {
    let (offset, limit) = page.raw();
    Ok(Json(
        state
            .billing
            .list_plans(&owner, &project_id, offset, limit)
            .await?,
    ))
}

pub async fn create_plan_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
    Json(payload): Json<CreatePlanRequest>,
) -> ServiceResult<Json<OkResponse>> {
    Ok(Json(
        state
            .billing
            .create_plan(&owner, &project_id, payload)
            .await?,
    ))
}

pub async fn set_plan_status_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path((project_id, plan_id)): Path<(String, u32)>,
    Json(payload): Json<SetPlanStatusRequest>,
) -> ServiceResult<Json<OkResponse>> {
    Ok(Json(
        state
            .billing
            .set_plan_status(&owner, &project_id, plan_id, payload.active)
            .await?,
    ))
}

pub async fn list_subscriptions_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ServiceResult<Json<PageResponse<Subscription>>> {
    let (offset, limit) = page.raw();
    Ok(Json(
        state
            .billing
            .list_subscriptions(&owner, &project_id, offset, limit)
            .await?,
    ))
}

pub async fn renew_due_handler(
    State(state): Shared,
    OwnerIdentity(owner): OwnerIdentity,
    Path(project_id): Path<String>,
) -> ServiceResult<Json<RenewDueReport>> {
    Ok(Json(
        state.billing.trigger_renew_due(&owner, &project_id).await?,
    ))
}

// ---- Checkout (public) ----

pub async fn checkout_context_handler(
    State(state): Shared,
    Path(project_id): Path<String>,
    Query(query): Query<CheckoutQuery>,
) -> ServiceResult<Json<CheckoutContext>> {
    Ok(Json(
        state
            .billing
            .get_checkout_context(&project_id, query.subscriber.as_deref())
            .await?,
    ))
}

pub async fn prepare_subscribe_handler(
    State(state): Shared,
    Path(project_id): Path<String>,
    Json(payload): Json<PrepareSubscribeRequest>,
) -> ServiceResult<Json<PreparedTx>> {
    Ok(Json(
        state.billing.prepare_subscribe(&project_id, payload).await?,
    ))
}

pub async fn prepare_cancel_handler(
    State(state): Shared,
    Path(project_id): Path<String>,
    Json(payload): Json<PrepareCancelRequest>,
) -> ServiceResult<Json<PreparedTx>> {
    Ok(Json(
        state
            .billing
            .prepare_cancel(&project_id, &payload.subscriber)
            .await?,
    ))
}

pub async fn prepare_allowance_handler(
    State(state): Shared,
    Path(project_id): Path<String>,
    Json(payload): Json<PrepareAllowanceRequest>,
) -> ServiceResult<Json<PreparedTx>> {
    Ok(Json(
        state
            .billing
            .prepare_renew_allowance(&project_id, payload)
            .await?,
    ))
}

pub async fn prepare_increase_cycles_handler(
    State(state): Shared,
    Path(project_id): Path<String>,
    Json(payload): Json<PrepareIncreaseCyclesRequest>,
) -> ServiceResult<Json<IncreaseCyclesResponse>> {
    Ok(Json(
        state
            .billing
            .prepare_increase_allowance_cycles(&project_id, payload)
            .await?,
    ))
}

pub async fn submit_checkout_handler(
    State(state): Shared,
    Json(payload): Json<SubmitSignedRequest>,
) -> ServiceResult<Json<SubmittedTx>> {
    Ok(Json(
        state
            .billing
            .submit_user_signed_xdr(&payload.signed_xdr)
            .await?,
    ))
}

// ---- Internal ----

/// Cloud Tasks callback
pub async fn deploy_task_handler(
    State(state): Shared,
    headers: HeaderMap,
    Json(payload): Json<DeployTaskPayload>,
) -> ServiceResult<Json<OkResponse>> {
    check_internal_token(
        &headers,
        state.internal_tasks_token.as_deref(),
        "Invalid internal task token",
    )?;
    info!("Deployment task received for {}", payload.deployment_id);
    state.executor.execute_task(&payload).await?;
    Ok(Json(OkResponse::OK))
}

/// Called by the contracts release pipeline after uploading a build.
pub async fn register_release_handler(
    State(state): Shared,
    headers: HeaderMap,
    Json(payload): Json<RegisterReleaseRequest>,
) -> ServiceResult<(StatusCode, Json<IdResponse>)> {
    check_internal_token(
        &headers,
        state.wasm_releases_internal_token.as_deref(),
        "Invalid wasm release internal token",
    )?;
    if payload.contract_name.trim().is_empty() {
        return Err(ServiceError::bad_request("contractName is required"));
    }
    Hash32::from_hex(&payload.wasm_hash)
        .map_err(|e| ServiceError::bad_request(format!("Invalid wasmHash: {}", e)))?;

    let release = state.releases.create(payload).await?;
    info!(
        "Registered {} release {} on {}",
        release.contract_name, release.id, release.network
    );
    Ok((StatusCode::CREATED, Json(IdResponse { id: release.id })))
}

// ---- Whitelist ----

pub async fn add_whitelist_email_handler(
    State(state): Shared,
    Json(payload): Json<AddEmailRequest>,
) -> ServiceResult<(StatusCode, Json<AddEmailResponse>)> {
    let result = state.whitelist.add_email(payload.email.as_ref()).await?;
    let status = if result.success {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

pub async fn whitelist_stats_handler(
    State(state): Shared,
) -> ServiceResult<Json<WhitelistStats>> {
    Ok(Json(state.whitelist.stats().await?))
}
