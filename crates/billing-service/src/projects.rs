//! Project management for authenticated owners

use subfy_common::{Network, PaymentCurrency};
use tracing::info;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{CreateProjectRequest, Project};
use crate::records::{NewProject, Projects};

/// Load a project and check it belongs to `owner`.
pub async fn require_owned_project(
    projects: &Projects,
    project_id: &str,
    owner: &str,
) -> ServiceResult<Project> {
    let project = projects
        .find(project_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Project not found"))?;
    if project.owner_public_key != owner {
        return Err(ServiceError::unauthorized("You do not own this project"));
    }
    Ok(project)
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct ProjectService {
    projects: Projects,
}

impl ProjectService {
    pub fn new(projects: Projects) -> Self {
        Self { projects }
    }

    pub async fn create_project(
        &self,
        owner: &str,
        input: CreateProjectRequest,
    ) -> ServiceResult<Project> {
        let name = trimmed(input.name.as_deref())
            .ok_or_else(|| ServiceError::bad_request("Project name is required"))?;
        let treasury = trimmed(input.treasury_address.as_deref())
            .ok_or_else(|| ServiceError::bad_request("Treasury address is required"))?;
        let payment_currency: PaymentCurrency = match trimmed(input.payment_currency.as_deref()) {
            None => PaymentCurrency::default(),
            Some(raw) => raw.parse().map_err(|_| {
                ServiceError::bad_request("Payment currency must be USDC or EURC")
            })?,
        };
        let network: Network = match trimmed(input.network.as_deref()) {
            None => Network::default(),
            Some(raw) => raw
                .parse()
                .map_err(|e: subfy_common::Error| ServiceError::bad_request(e.to_string()))?,
        };

        let project = self
            .projects
            .create(NewProject {
                owner_public_key: owner.to_string(),
                name: name.to_string(),
                network,
                payment_currency,
                treasury_address: treasury.to_string(),
                payment_token_contract_id: trimmed(input.payment_token_contract_id.as_deref())
                    .map(str::to_string),
            })
            .await?;

        info!(
            "Project {} created on {} ({})",
            project.id, project.network, project.payment_currency
        );
        Ok(project)
    }

    pub async fn list_projects(&self, owner: &str) -> ServiceResult<Vec<Project>> {
        Ok(self.projects.list_by_owner(owner).await?)
    }

    pub async fn get_project(&self, owner: &str, project_id: &str) -> ServiceResult<Project> {
        require_owned_project(&self.projects, project_id, owner).await
    }

    pub async fn rename_project(
        &self,
        owner: &str,
        project_id: &str,
        name: Option<&str>,
    ) -> ServiceResult<Project> {
        let name = trimmed(name)
            .ok_or_else(|| ServiceError::bad_request("Project name is required"))?;
        require_owned_project(&self.projects, project_id, owner).await?;
        self.projects.rename(project_id, name).await?;
        self.projects
            .find(project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project not found after update"))
    }
}
