//! Data models for the billing service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soroban_client::PreparedTx;
use subfy_common::{Network, PaymentCurrency};

/// Project lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    /// Created, no contract yet
    Draft,
    /// A deployment was submitted and has not finished
    Deploying,
    /// Contract deployed and initialized
    Active,
    /// Last deployment failed
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "DRAFT",
            ProjectStatus::Deploying => "DEPLOYING",
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Failed => "FAILED",
        }
    }
}

/// A tenant whose plans and subscribers live in one subscription contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub owner_public_key: String,
    pub name: String,
    pub network: Network,
    pub status: ProjectStatus,
    pub subscription_contract_id: Option<String>,
    pub payment_token_contract_id: Option<String>,
    #[serde(default)]
    pub payment_currency: PaymentCurrency,
    pub treasury_address: String,
    pub wasm_artifact_path: Option<String>,
    pub wasm_release_id: Option<String>,
    pub deployed_wasm_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deployment execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    Queued,
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Running => "RUNNING",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

/// One attempt to deploy and initialize a project's contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub owner_public_key: String,
    pub status: DeploymentStatus,
    pub signed_xdr: String,
    pub tx_hash: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub task_name: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    pub proposed_subscription_contract_id: Option<String>,
    pub proposed_payment_token_contract_id: Option<String>,
    pub wasm_release_id: Option<String>,
    pub wasm_hash: Option<String>,
    pub salt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A published build of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub contract_name: String,
    pub network: Network,
    pub bucket_path: String,
    pub gcs_uri: String,
    /// Code hash installed on the ledger
    pub wasm_hash: String,
    /// Content hash of the artifact
    pub sha256: String,
    pub git_sha: String,
    pub uploaded_at_utc: DateTime<Utc>,
    pub payment_token_contract_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Plan as stored in the subscription contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: u32,
    pub name: String,
    pub period_ledgers: u32,
    /// Decimal string, i128 on the ledger
    pub price_stroops: String,
    pub active: bool,
}

impl Plan {
    /// Map a decoded contract value, accepting snake_case or camelCase keys.
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: field_u32(value, "id", "id"),
            name: field(value, "name", "name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            period_ledgers: field_u32(value, "period_ledgers", "periodLedgers"),
            price_stroops: match field(value, "price_stroops", "priceStroops") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => "0".to_string(),
            },
            active: field_bool(value, "active", "active"),
        }
    }
}

/// Subscription as stored in the subscription contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscriber: String,
    pub plan_id: u32,
    pub started_ledger: u32,
    pub next_renewal_ledger: u32,
    pub active: bool,
}

impl Subscription {
    pub fn from_value(value: &Value) -> Self {
        Self {
            subscriber: field(value, "subscriber", "subscriber")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            plan_id: field_u32(value, "plan_id", "planId"),
            started_ledger: field_u32(value, "started_ledger", "startedLedger"),
            next_renewal_ledger: field_u32(value, "next_renewal_ledger", "nextRenewalLedger"),
            active: field_bool(value, "active", "active"),
        }
    }
}

fn field<'a>(value: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    value
        .get(snake)
        .filter(|v| !v.is_null())
        .or_else(|| value.get(camel))
}

fn field_u32(value: &Value, snake: &str, camel: &str) -> u32 {
    match field(value, snake, camel) {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn field_bool(value: &Value, snake: &str, camel: &str) -> bool {
    field(value, snake, camel)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Early-access signup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    pub id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of a deployment execution task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTaskPayload {
    pub deployment_id: String,
    pub project_id: String,
}

// ---- Projects ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub network: Option<String>,
    pub payment_currency: Option<String>,
    pub treasury_address: Option<String>,
    pub payment_token_contract_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameProjectRequest {
    pub name: Option<String>,
}

// ---- Deployments ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareDeploymentResponse {
    pub project_id: String,
    pub network: Network,
    pub wasm_artifact_path: String,
    pub wasm_release_id: String,
    pub wasm_hash: String,
    pub unsigned_xdr: String,
    pub salt_hex: String,
    pub network_passphrase: String,
    pub owner_public_key: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDeploymentRequest {
    #[serde(default)]
    pub signed_xdr: String,
    pub wasm_release_id: Option<String>,
    pub wasm_hash: Option<String>,
    pub salt_hex: Option<String>,
    pub proposed_payment_token_contract_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDeploymentResponse {
    pub deployment_id: String,
    pub status: DeploymentStatus,
}

// ---- Billing ----

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    /// Raw values with HTTP defaults (offset 0, limit 20); garbage becomes NaN.
    pub fn raw(&self) -> (f64, f64) {
        fn parse(v: &Option<String>, default: f64) -> f64 {
            match v {
                Some(s) => s.trim().parse().unwrap_or(f64::NAN),
                None => default,
            }
        }
        (parse(&self.offset, 0.0), parse(&self.limit, 20.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub project_id: String,
    pub subscription_contract_id: String,
    pub offset: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub plan_id: u32,
    pub name: String,
    pub period_ledgers: u32,
    /// Integer as a string or number
    pub price_stroops: Value,
}

#[derive(Debug, Deserialize)]
pub struct SetPlanStatusRequest {
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: OkResponse = OkResponse { ok: true };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewDueReport {
    pub project_id: String,
    pub status: String,
    pub subscription_contract_id: String,
    pub scanned: u32,
    pub renewed: u32,
    pub skipped_allowance: u32,
    pub failed: u32,
    pub latest_ledger: u32,
}

// ---- Checkout ----

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutQuery {
    pub subscriber: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutProject {
    pub id: String,
    pub name: String,
    pub network: Network,
    pub payment_currency: PaymentCurrency,
    pub subscription_contract_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutContext {
    pub project: CheckoutProject,
    pub remaining_allowance_stroops: Option<String>,
    pub remaining_cycles: Option<u64>,
    pub plans: Vec<Plan>,
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareSubscribeRequest {
    #[serde(default)]
    pub subscriber: String,
    pub plan_id: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrepareCancelRequest {
    #[serde(default)]
    pub subscriber: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareAllowanceRequest {
    #[serde(default)]
    pub subscriber: String,
    #[serde(default)]
    pub amount_stroops: Value,
    /// Absolute ledger at which the allowance expires
    #[serde(alias = "expirationLedgers")]
    pub expiration_ledger: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareIncreaseCyclesRequest {
    #[serde(default)]
    pub subscriber: String,
    pub plan_id: u32,
    pub additional_cycles: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncreaseCyclesResponse {
    #[serde(flatten)]
    pub prepared: PreparedTx,
    pub expiration_ledger: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSignedRequest {
    #[serde(default)]
    pub signed_xdr: String,
}

// ---- Releases ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterReleaseRequest {
    pub contract_name: String,
    pub network: Network,
    pub bucket_path: String,
    pub gcs_uri: String,
    pub wasm_hash: String,
    pub sha256: String,
    pub git_sha: String,
    pub uploaded_at_utc: DateTime<Utc>,
    pub payment_token_contract_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

// ---- Auth ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub challenge: String,
    pub network_passphrase: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(default)]
    pub public_key: String,
    /// Base64 ed25519 signature over the challenge string
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub public_key: String,
}

// ---- Whitelist ----

/// `email` stays untyped so a non-string value is rejected with the same
/// message as a missing one.
#[derive(Debug, Default, Deserialize)]
pub struct AddEmailRequest {
    pub email: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEmailResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistStatsEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistStats {
    pub total: usize,
    pub entries: Vec<WhitelistStatsEntry>,
}
