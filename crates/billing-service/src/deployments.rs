//! Contract deployment: wallet-signed deploy transaction, then backend init

use anyhow::{Context, Result};
use soroban_client::{Ledger, ScArg};
use std::sync::Arc;
use subfy_common::ContractError;
use tracing::{error, info, warn};

use crate::config::PaymentTokenConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    DeployTaskPayload, Deployment, DeploymentStatus, PrepareDeploymentResponse, ProjectStatus,
    SubmitDeploymentRequest, SubmitDeploymentResponse,
};
use crate::projects::require_owned_project;
use crate::records::{
    ContractsUpdate, DeploymentUpdate, Deployments, NewDeployment, Projects, Releases,
};
use crate::tasks::TaskDispatcher;

/// Contract name under which subscription releases are registered.
pub const SUBSCRIPTION_CONTRACT: &str = "sb_subscription";

pub const DEPLOY_EXECUTION_ERROR: &str = "DEPLOY_EXECUTION_ERROR";

/// Runs deployment tasks. Shared by every dispatch mode and the queue worker.
#[derive(Clone)]
pub struct DeploymentExecutor {
    deployments: Deployments,
    projects: Projects,
    releases: Releases,
    ledger: Arc<dyn Ledger>,
    tokens: PaymentTokenConfig,
}

impl DeploymentExecutor {
    pub fn new(
        deployments: Deployments,
        projects: Projects,
        releases: Releases,
        ledger: Arc<dyn Ledger>,
        tokens: PaymentTokenConfig,
    ) -> Self {
        Self {
            deployments,
            projects,
            releases,
            ledger,
            tokens,
        }
    }

    /// Submit the signed deployment and initialize the new contract.
    ///
    /// Failures are recorded on the deployment and project; the returned
    /// error only covers the bookkeeping writes themselves.
    pub async fn execute_task(&self, payload: &DeployTaskPayload) -> Result<()> {
        let Some(deployment) = self.deployments.find(&payload.deployment_id).await? else {
            warn!("Deployment {} not found, skipping task", payload.deployment_id);
            return Ok(());
        };
        if deployment.status.is_terminal() {
            warn!(
                "Deployment {} already {}, skipping task",
                deployment.id,
                deployment.status.as_str()
            );
            return Ok(());
        }

        self.deployments
            .update(
                &deployment.id,
                DeploymentUpdate::status(DeploymentStatus::Running)
                    .increment_attempt()
                    .clear_error(),
            )
            .await?;
        info!("Executing deployment {}", deployment.id);

        match self.deploy_and_init(&deployment, &payload.project_id).await {
            Ok(tx_hash) => {
                info!("Deployment {} succeeded (tx {})", deployment.id, tx_hash);
                Ok(())
            }
            Err(err) => {
                let message = format!("{:#}", err);
                error!("Deployment {} failed: {}", deployment.id, message);
                self.deployments
                    .update(
                        &deployment.id,
                        DeploymentUpdate::status(DeploymentStatus::Failed)
                            .error(DEPLOY_EXECUTION_ERROR, &message)
                            .finished(),
                    )
                    .await?;
                self.projects
                    .update_status(&payload.project_id, ProjectStatus::Failed)
                    .await
            }
        }
    }

    async fn deploy_and_init(&self, deployment: &Deployment, project_id: &str) -> Result<String> {
        let submitted = self.ledger.submit_signed(&deployment.signed_xdr).await?;

        let project = self
            .projects
            .find(project_id)
            .await?
            .with_context(|| format!("Project {} not found", project_id))?;
        let contract_id = submitted
            .contract_id
            .clone()
            .context("Unable to determine deployed contract ID")?;

        let release = match &deployment.wasm_release_id {
            Some(id) => self.releases.find(id).await?,
            None => None,
        };
        let payment_token = deployment
            .proposed_payment_token_contract_id
            .clone()
            .or_else(|| project.payment_token_contract_id.clone())
            .or_else(|| self.tokens.for_network(project.network, project.payment_currency))
            .or_else(|| release.as_ref().and_then(|r| r.payment_token_contract_id.clone()))
            .or_else(|| self.tokens.global.clone())
            .context("Missing payment token contract ID for init (project/payment/env)")?;

        let init_args = vec![
            ScArg::address(self.ledger.backend_public_key()),
            ScArg::address(payment_token.as_str()),
            ScArg::address(project.treasury_address.as_str()),
        ];
        if let Err(err) = self.ledger.invoke_signed(&contract_id, "init", init_args).await {
            if ContractError::from_message(&err.to_string())
                != Some(ContractError::AlreadyInitialized)
            {
                return Err(err.into());
            }
            warn!("Contract {} was already initialized", contract_id);
        }

        self.deployments
            .update(
                &deployment.id,
                DeploymentUpdate::status(DeploymentStatus::Success)
                    .tx_hash(&submitted.tx_hash)
                    .finished(),
            )
            .await?;
        self.projects
            .update_contracts(
                &project.id,
                ContractsUpdate {
                    subscription_contract_id: Some(contract_id),
                    payment_token_contract_id: Some(payment_token),
                    wasm_artifact_path: release.map(|r| r.gcs_uri),
                    wasm_release_id: deployment.wasm_release_id.clone(),
                    deployed_wasm_hash: deployment.wasm_hash.clone(),
                },
            )
            .await?;
        self.projects
            .update_status(&project.id, ProjectStatus::Active)
            .await?;

        Ok(submitted.tx_hash)
    }
}

/// Owner-facing deployment endpoints
#[derive(Clone)]
pub struct DeploymentService {
    deployments: Deployments,
    projects: Projects,
    releases: Releases,
    ledger: Arc<dyn Ledger>,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl DeploymentService {
    pub fn new(
        deployments: Deployments,
        projects: Projects,
        releases: Releases,
        ledger: Arc<dyn Ledger>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            deployments,
            projects,
            releases,
            ledger,
            dispatcher,
        }
    }

    /// Build the unsigned deploy transaction for the latest release.
    pub async fn prepare(
        &self,
        owner: &str,
        project_id: &str,
    ) -> ServiceResult<PrepareDeploymentResponse> {
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        let release = self
            .releases
            .find_latest(SUBSCRIPTION_CONTRACT, project.network)
            .await?
            .ok_or_else(|| {
                ServiceError::bad_request(
                    "No deployed wasm release available. Run contracts CD first.",
                )
            })?;

        let prepared = self
            .ledger
            .prepare_deploy_contract(owner, &release.wasm_hash)
            .await
            .map_err(|e| ServiceError::from_contract(&e))?;

        Ok(PrepareDeploymentResponse {
            project_id: project.id,
            network: project.network,
            wasm_artifact_path: release.gcs_uri,
            wasm_release_id: release.id,
            wasm_hash: release.wasm_hash,
            unsigned_xdr: prepared.unsigned_xdr,
            salt_hex: prepared.salt_hex,
            network_passphrase: self.ledger.network_passphrase().to_string(),
            owner_public_key: project.owner_public_key,
        })
    }

    /// Record the signed deployment and hand it to the dispatcher.
    pub async fn submit(
        &self,
        owner: &str,
        project_id: &str,
        input: SubmitDeploymentRequest,
    ) -> ServiceResult<SubmitDeploymentResponse> {
        require_owned_project(&self.projects, project_id, owner).await?;
        let signed_xdr = input.signed_xdr.trim();
        if signed_xdr.is_empty() {
            return Err(ServiceError::bad_request("signedXdr is required"));
        }

        let deployment = self
            .deployments
            .create(NewDeployment {
                project_id: project_id.to_string(),
                owner_public_key: owner.to_string(),
                signed_xdr: signed_xdr.to_string(),
                proposed_subscription_contract_id: None,
                proposed_payment_token_contract_id: input.proposed_payment_token_contract_id,
                wasm_release_id: input.wasm_release_id,
                wasm_hash: input.wasm_hash,
                salt: input.salt_hex,
            })
            .await?;
        self.projects
            .update_status(project_id, ProjectStatus::Deploying)
            .await?;

        let payload = DeployTaskPayload {
            deployment_id: deployment.id.clone(),
            project_id: project_id.to_string(),
        };
        let status = match self.dispatcher.enqueue(payload).await? {
            Some(task_name) => {
                info!("Deployment {} queued as {}", deployment.id, task_name);
                self.deployments.mark_queued(&deployment.id, &task_name).await?
            }
            None => self
                .deployments
                .find(&deployment.id)
                .await?
                .map(|d| d.status)
                .unwrap_or(DeploymentStatus::Pending),
        };

        Ok(SubmitDeploymentResponse {
            deployment_id: deployment.id,
            status,
        })
    }

    pub async fn get_status(&self, owner: &str, deployment_id: &str) -> ServiceResult<Deployment> {
        let deployment = self
            .deployments
            .find(deployment_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Deployment not found"))?;
        if deployment.owner_public_key != owner {
            return Err(ServiceError::unauthorized("You do not own this deployment"));
        }
        Ok(deployment)
    }
}
