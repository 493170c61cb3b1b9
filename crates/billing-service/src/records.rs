//! Typed repositories over the document store

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use subfy_common::{Network, PaymentCurrency};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Deployment, DeploymentStatus, Project, ProjectStatus, RegisterReleaseRequest, Release,
    WhitelistEntry,
};
use crate::storage::{now, Document, DocumentStore, FieldPatch, Query};

pub const PROJECTS: &str = "projects";
pub const DEPLOYMENTS: &str = "deployments";
pub const RELEASES: &str = "wasm_releases";
pub const WHITELIST: &str = "whitelist";

fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record).context("Failed to serialize record")? {
        Value::Object(doc) => Ok(doc),
        _ => anyhow::bail!("Record did not serialize to an object"),
    }
}

fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc)).context("Failed to deserialize record")
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ---- Projects ----

#[derive(Debug, Clone)]
pub struct NewProject {
    pub owner_public_key: String,
    pub name: String,
    pub network: Network,
    pub payment_currency: PaymentCurrency,
    pub treasury_address: String,
    pub payment_token_contract_id: Option<String>,
}

/// Contract references written after a deployment. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ContractsUpdate {
    pub subscription_contract_id: Option<String>,
    pub payment_token_contract_id: Option<String>,
    pub wasm_artifact_path: Option<String>,
    pub wasm_release_id: Option<String>,
    pub deployed_wasm_hash: Option<String>,
}

#[derive(Clone)]
pub struct Projects {
    store: Arc<dyn DocumentStore>,
}

impl Projects {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: NewProject) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            owner_public_key: input.owner_public_key,
            name: input.name,
            network: input.network,
            status: ProjectStatus::Draft,
            subscription_contract_id: None,
            payment_token_contract_id: input.payment_token_contract_id,
            payment_currency: input.payment_currency,
            treasury_address: input.treasury_address,
            wasm_artifact_path: None,
            wasm_release_id: None,
            deployed_wasm_hash: None,
            created_at: now,
            updated_at: now,
        };
        self.store
            .put(PROJECTS, &project.id, to_document(&project)?)
            .await?;
        debug!("Created project {}", project.id);
        Ok(project)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Project>> {
        self.store
            .get(PROJECTS, id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Newest first.
    pub async fn list_by_owner(&self, owner_public_key: &str) -> Result<Vec<Project>> {
        let query = Query::new()
            .filter("ownerPublicKey", owner_public_key)
            .order_by("createdAt", true);
        self.store
            .find_by(PROJECTS, &query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn update_status(&self, id: &str, status: ProjectStatus) -> Result<()> {
        let patch = FieldPatch::new()
            .set("status", status.as_str())
            .set("updatedAt", now());
        self.store.update(PROJECTS, id, patch).await
    }

    pub async fn update_contracts(&self, id: &str, update: ContractsUpdate) -> Result<()> {
        let mut patch = FieldPatch::new().set("updatedAt", now());
        for (field, value) in [
            ("subscriptionContractId", update.subscription_contract_id),
            ("paymentTokenContractId", update.payment_token_contract_id),
            ("wasmArtifactPath", update.wasm_artifact_path),
            ("wasmReleaseId", update.wasm_release_id),
            ("deployedWasmHash", update.deployed_wasm_hash),
        ] {
            if let Some(value) = value {
                patch = patch.set(field, value);
            }
        }
        self.store.update(PROJECTS, id, patch).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let patch = FieldPatch::new().set("name", name).set("updatedAt", now());
        self.store.update(PROJECTS, id, patch).await
    }
}

// ---- Deployments ----

#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub project_id: String,
    pub owner_public_key: String,
    pub signed_xdr: String,
    pub proposed_subscription_contract_id: Option<String>,
    pub proposed_payment_token_contract_id: Option<String>,
    pub wasm_release_id: Option<String>,
    pub wasm_hash: Option<String>,
    pub salt: Option<String>,
}

/// Status transition plus the fields that go with it.
#[derive(Debug, Clone)]
pub struct DeploymentUpdate {
    patch: FieldPatch,
}

impl DeploymentUpdate {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            patch: FieldPatch::new()
                .set("status", status.as_str())
                .set("updatedAt", now()),
        }
    }

    pub fn tx_hash(mut self, tx_hash: &str) -> Self {
        self.patch = self.patch.set("txHash", tx_hash);
        self
    }

    pub fn error(mut self, code: &str, message: &str) -> Self {
        self.patch = self.patch.set("errorCode", code).set("errorMessage", message);
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.patch = self
            .patch
            .set("errorCode", Value::Null)
            .set("errorMessage", Value::Null);
        self
    }

    pub fn task_name(mut self, task_name: &str) -> Self {
        self.patch = self.patch.set("taskName", task_name);
        self
    }

    pub fn increment_attempt(mut self) -> Self {
        self.patch = self.patch.increment("attemptCount", 1);
        self
    }

    /// Stamp `finishedAt`; a second stamp is ignored.
    pub fn finished(mut self) -> Self {
        self.patch = self.patch.set_once("finishedAt", now());
        self
    }
}

#[derive(Clone)]
pub struct Deployments {
    store: Arc<dyn DocumentStore>,
}

impl Deployments {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: NewDeployment) -> Result<Deployment> {
        let now = Utc::now();
        let deployment = Deployment {
            id: new_id(),
            project_id: input.project_id,
            owner_public_key: input.owner_public_key,
            status: DeploymentStatus::Pending,
            signed_xdr: input.signed_xdr,
            tx_hash: None,
            error_code: None,
            error_message: None,
            task_name: None,
            attempt_count: 0,
            proposed_subscription_contract_id: input.proposed_subscription_contract_id,
            proposed_payment_token_contract_id: input.proposed_payment_token_contract_id,
            wasm_release_id: input.wasm_release_id,
            wasm_hash: input.wasm_hash,
            salt: input.salt,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        self.store
            .put(DEPLOYMENTS, &deployment.id, to_document(&deployment)?)
            .await?;
        debug!("Created deployment {}", deployment.id);
        Ok(deployment)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Deployment>> {
        self.store
            .get(DEPLOYMENTS, id)
            .await?
            .map(from_document)
            .transpose()
    }

    pub async fn update(&self, id: &str, update: DeploymentUpdate) -> Result<()> {
        self.store.update(DEPLOYMENTS, id, update.patch).await
    }

    /// Record the queue task name, moving the status to QUEUED only if the
    /// deployment is still PENDING. Returns the resulting status.
    pub async fn mark_queued(&self, id: &str, task_name: &str) -> Result<DeploymentStatus> {
        let current = self
            .find(id)
            .await?
            .with_context(|| format!("Deployment not found: {}", id))?;

        if current.status == DeploymentStatus::Pending {
            self.update(
                id,
                DeploymentUpdate::status(DeploymentStatus::Queued).task_name(task_name),
            )
            .await?;
            Ok(DeploymentStatus::Queued)
        } else {
            let patch = FieldPatch::new().set("taskName", task_name).set("updatedAt", now());
            self.store.update(DEPLOYMENTS, id, patch).await?;
            Ok(current.status)
        }
    }
}

// ---- Releases ----

#[derive(Clone)]
pub struct Releases {
    store: Arc<dyn DocumentStore>,
}

impl Releases {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, input: RegisterReleaseRequest) -> Result<Release> {
        let release = Release {
            id: new_id(),
            contract_name: input.contract_name,
            network: input.network,
            bucket_path: input.bucket_path,
            gcs_uri: input.gcs_uri,
            wasm_hash: input.wasm_hash,
            sha256: input.sha256,
            git_sha: input.git_sha,
            uploaded_at_utc: input.uploaded_at_utc,
            payment_token_contract_id: input.payment_token_contract_id,
            created_at: Utc::now(),
        };
        self.store
            .put(RELEASES, &release.id, to_document(&release)?)
            .await?;
        Ok(release)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Release>> {
        self.store
            .get(RELEASES, id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Most recently uploaded release of a contract for a network.
    pub async fn find_latest(&self, contract_name: &str, network: Network) -> Result<Option<Release>> {
        let query = Query::new()
            .filter("contractName", contract_name)
            .filter("network", network.as_str())
            .order_by("uploadedAtUtc", true)
            .limit(1);
        self.store
            .find_by(RELEASES, &query)
            .await?
            .into_iter()
            .next()
            .map(from_document)
            .transpose()
    }
}

// ---- Whitelist ----

#[derive(Clone)]
pub struct Whitelist {
    store: Arc<dyn DocumentStore>,
}

impl Whitelist {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, email: &str) -> Result<WhitelistEntry> {
        let entry = WhitelistEntry {
            id: new_id(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .put(WHITELIST, &entry.id, to_document(&entry)?)
            .await?;
        Ok(entry)
    }

    pub async fn contains(&self, email: &str) -> Result<bool> {
        let query = Query::new().filter("email", email).limit(1);
        Ok(!self.store.find_by(WHITELIST, &query).await?.is_empty())
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<WhitelistEntry>> {
        let query = Query::new().order_by("createdAt", true);
        self.store
            .find_by(WHITELIST, &query)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }
}
