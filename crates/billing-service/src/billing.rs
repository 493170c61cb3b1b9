//! Billing operations against a project's subscription contract
//!
//! Owner operations (plans, subscriptions, renewal sweep) require the caller to
//! own the project. Checkout operations are public and only build unsigned
//! transactions for the subscriber's wallet; the backend never signs for them.

use serde_json::Value;
use soroban_client::{Ledger, LedgerError, PreparedTx, ScArg, SubmittedTx};
use std::sync::Arc;
use subfy_common::contract_error::is_allowance_error;
use subfy_common::{parse_i128_like, ContractError};
use tracing::{debug, info, warn};

use crate::config::PaymentTokenConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    CheckoutContext, CheckoutProject, CreatePlanRequest, IncreaseCyclesResponse, OkResponse,
    PageResponse, Plan, PrepareAllowanceRequest, PrepareIncreaseCyclesRequest,
    PrepareSubscribeRequest, Project, RenewDueReport, Subscription,
};
use crate::projects::require_owned_project;
use crate::records::{ContractsUpdate, Projects};

/// Largest page the subscription contract accepts.
pub const MAX_CONTRACT_PAGE_SIZE: u32 = 50;
/// Maximum lifetime of a token allowance, in ledgers.
pub const MAX_TOKEN_ALLOWANCE_WINDOW: u32 = 3_110_400;
pub const ALLOWANCE_EXPIRATION_SAFETY_MARGIN: u32 = 1_000;

const CHECKOUT_PAGE_SIZES: [u32; 4] = [20, 10, 5, 1];
const RENEW_PAGE_SIZE: u32 = 50;
const RENEW_MAX_PAGES: u32 = 200;

/// Clamp caller-supplied pagination: offset floored at 0, limit in 1..=50.
/// Non-finite or non-positive limits become the maximum page size.
pub fn normalize_pagination(offset: f64, limit: f64) -> (u32, u32) {
    let offset = if offset.is_finite() && offset > 0.0 {
        offset.floor().min(u32::MAX as f64) as u32
    } else {
        0
    };
    let limit = if limit.is_finite() && limit >= 1.0 {
        (limit.floor() as u64).min(MAX_CONTRACT_PAGE_SIZE as u64) as u32
    } else {
        MAX_CONTRACT_PAGE_SIZE
    };
    (offset, limit)
}

/// Expiration ledger for a token allowance.
///
/// Requests at or below `latest` fall back to the furthest ledger the token
/// accepts, minus a safety margin.
pub fn clamp_allowance_expiration_ledger(latest: u32, requested: Option<u32>) -> ServiceResult<u32> {
    let max_by_window = latest as u64 + MAX_TOKEN_ALLOWANCE_WINDOW as u64
        - ALLOWANCE_EXPIRATION_SAFETY_MARGIN as u64;
    let candidate = match requested {
        Some(r) if r > latest => r as u64,
        _ => max_by_window,
    };
    let clamped = candidate.min(max_by_window).min(u32::MAX as u64);
    if clamped <= latest as u64 {
        return Err(ServiceError::bad_request(format!(
            "Unable to set allowance expiration: latest ledger {} is too close to token max window {}.",
            latest, MAX_TOKEN_ALLOWANCE_WINDOW
        )));
    }
    Ok(clamped as u32)
}

fn contract_code(err: &LedgerError) -> Option<ContractError> {
    ContractError::from_message(&err.to_string())
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn deployed_contract(project: &Project) -> ServiceResult<&str> {
    project
        .subscription_contract_id
        .as_deref()
        .ok_or_else(|| ServiceError::bad_request("Project has no deployed subscription contract"))
}

fn subscriber_address(raw: &str) -> ServiceResult<&str> {
    let address = raw.trim();
    if address.is_empty() {
        return Err(ServiceError::bad_request("Subscriber address is required"));
    }
    Ok(address)
}

#[derive(Clone)]
pub struct BillingService {
    projects: Projects,
    ledger: Arc<dyn Ledger>,
    tokens: PaymentTokenConfig,
}

impl BillingService {
    pub fn new(projects: Projects, ledger: Arc<dyn Ledger>, tokens: PaymentTokenConfig) -> Self {
        Self {
            projects,
            ledger,
            tokens,
        }
    }

    /// Project setting first, then configured defaults.
    fn resolve_payment_token(&self, project: &Project) -> Option<String> {
        project
            .payment_token_contract_id
            .clone()
            .or_else(|| self.tokens.resolve(project.network, project.payment_currency))
    }

    async fn checkout_project(&self, project_id: &str) -> ServiceResult<Project> {
        let project = self
            .projects
            .find(project_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Project not found"))?;
        deployed_contract(&project)?;
        Ok(project)
    }

    /// Run `init(backend, paymentToken, treasury)` on the project's contract.
    ///
    /// An already initialized contract counts as success.
    pub async fn initialize_contract_if_possible(&self, project: &Project) -> ServiceResult<()> {
        let contract_id = deployed_contract(project)?;
        let token = self.resolve_payment_token(project).ok_or_else(|| {
            ServiceError::bad_request(
                "Contract is not initialized and project has no payment token contract configured",
            )
        })?;

        let args = vec![
            ScArg::address(self.ledger.backend_public_key()),
            ScArg::address(token.as_str()),
            ScArg::address(project.treasury_address.as_str()),
        ];
        match self.ledger.invoke_signed(contract_id, "init", args).await {
            Ok(tx) => {
                info!("Initialized contract {} (tx {})", contract_id, tx.tx_hash);
                if project.payment_token_contract_id.is_none() {
                    self.projects
                        .update_contracts(
                            &project.id,
                            ContractsUpdate {
                                payment_token_contract_id: Some(token),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Ok(())
            }
            Err(err) if contract_code(&err) == Some(ContractError::AlreadyInitialized) => {
                debug!("Contract {} already initialized", contract_id);
                Ok(())
            }
            Err(err) => Err(ServiceError::from_contract(&err)),
        }
    }

    /// Read-only call that initializes the contract once on NotInitialized.
    async fn view_with_lazy_init(
        &self,
        project: &Project,
        method: &str,
        args: Vec<ScArg>,
    ) -> ServiceResult<Value> {
        let contract_id = deployed_contract(project)?;
        match self.ledger.invoke_view(contract_id, method, args.clone()).await {
            Ok(value) => Ok(value),
            Err(err) if contract_code(&err) == Some(ContractError::NotInitialized) => {
                self.initialize_contract_if_possible(project).await?;
                self.ledger
                    .invoke_view(contract_id, method, args)
                    .await
                    .map_err(|e| ServiceError::from_contract(&e))
            }
            Err(err) => Err(ServiceError::from_contract(&err)),
        }
    }

    /// Signed admin call made on behalf of `owner`.
    ///
    /// The contract admin is either the owner or the backend, depending on
    /// how the contract was initialized, so NotInitialized and Unauthorized
    /// both retry once with the backend key.
    async fn admin_call<F>(
        &self,
        project: &Project,
        owner: &str,
        method: &str,
        build_args: F,
    ) -> ServiceResult<()>
    where
        F: Fn(&str) -> Vec<ScArg>,
    {
        let contract_id = deployed_contract(project)?;
        let err = match self
            .ledger
            .invoke_signed(contract_id, method, build_args(owner))
            .await
        {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        match contract_code(&err) {
            Some(ContractError::NotInitialized) => {
                self.initialize_contract_if_possible(project).await?;
            }
            Some(ContractError::Unauthorized) => {
                debug!("{} rejected for owner, retrying as backend", method);
            }
            _ => return Err(ServiceError::from_contract(&err)),
        }

        self.ledger
            .invoke_signed(contract_id, method, build_args(self.ledger.backend_public_key()))
            .await
            .map(|_| ())
            .map_err(|e| ServiceError::from_contract(&e))
    }

    pub async fn list_plans(
        &self,
        owner: &str,
        project_id: &str,
        offset: f64,
        limit: f64,
    ) -> ServiceResult<PageResponse<Plan>> {
        let (offset, limit) = normalize_pagination(offset, limit);
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        let contract_id = deployed_contract(&project)?.to_string();

        let data = self
            .view_with_lazy_init(
                &project,
                "list_plans",
                vec![ScArg::U32(offset), ScArg::U32(limit)],
            )
            .await?;

        Ok(PageResponse {
            project_id: project.id,
            subscription_contract_id: contract_id,
            offset,
            limit,
            items: items(&data).iter().map(Plan::from_value).collect(),
        })
    }

    pub async fn list_subscriptions(
        &self,
        owner: &str,
        project_id: &str,
        offset: f64,
        limit: f64,
    ) -> ServiceResult<PageResponse<Subscription>> {
        let (offset, limit) = normalize_pagination(offset, limit);
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        let contract_id = deployed_contract(&project)?.to_string();

        let data = self
            .view_with_lazy_init(
                &project,
                "list_subscriptions",
                vec![ScArg::U32(offset), ScArg::U32(limit)],
            )
            .await?;

        Ok(PageResponse {
            project_id: project.id,
            subscription_contract_id: contract_id,
            offset,
            limit,
            items: items(&data).iter().map(Subscription::from_value).collect(),
        })
    }

    pub async fn create_plan(
        &self,
        owner: &str,
        project_id: &str,
        input: CreatePlanRequest,
    ) -> ServiceResult<OkResponse> {
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        deployed_contract(&project)?;
        let price = parse_i128_like(&input.price_stroops)
            .map_err(|e| ServiceError::bad_request(e.to_string()))?;

        self.admin_call(&project, owner, "create_plan", |admin| {
            vec![
                ScArg::address(admin),
                ScArg::U32(input.plan_id),
                ScArg::string(input.name.as_str()),
                ScArg::U32(input.period_ledgers),
                ScArg::I128(price),
            ]
        })
        .await?;

        info!("Plan {} created on project {}", input.plan_id, project.id);
        Ok(OkResponse::OK)
    }

    pub async fn set_plan_status(
        &self,
        owner: &str,
        project_id: &str,
        plan_id: u32,
        active: bool,
    ) -> ServiceResult<OkResponse> {
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        deployed_contract(&project)?;

        self.admin_call(&project, owner, "set_plan_status", |admin| {
            vec![ScArg::address(admin), ScArg::U32(plan_id), ScArg::Bool(active)]
        })
        .await?;

        info!(
            "Plan {} on project {} set active={}",
            plan_id, project.id, active
        );
        Ok(OkResponse::OK)
    }

    /// Renew every active subscription whose renewal ledger has passed.
    ///
    /// Individual renewal failures are counted, never fatal.
    pub async fn trigger_renew_due(
        &self,
        owner: &str,
        project_id: &str,
    ) -> ServiceResult<RenewDueReport> {
        let project = require_owned_project(&self.projects, project_id, owner).await?;
        let contract_id = deployed_contract(&project)?;
        let latest_ledger = self.ledger.latest_ledger_sequence().await?;

        let mut report = RenewDueReport {
            project_id: project.id.clone(),
            status: "completed".to_string(),
            subscription_contract_id: contract_id.to_string(),
            latest_ledger,
            ..Default::default()
        };

        for page in 0..RENEW_MAX_PAGES {
            let offset = page * RENEW_PAGE_SIZE;
            let data = self
                .ledger
                .invoke_view(
                    contract_id,
                    "list_subscriptions",
                    vec![ScArg::U32(offset), ScArg::U32(RENEW_PAGE_SIZE)],
                )
                .await
                .map_err(|e| ServiceError::from_contract(&e))?;
            let subscriptions: Vec<Subscription> =
                items(&data).iter().map(Subscription::from_value).collect();
            if subscriptions.is_empty() {
                break;
            }

            for subscription in subscriptions {
                report.scanned += 1;
                if !subscription.active || subscription.next_renewal_ledger > latest_ledger {
                    continue;
                }
                match self
                    .ledger
                    .invoke_signed(
                        contract_id,
                        "renew",
                        vec![ScArg::address(subscription.subscriber.as_str())],
                    )
                    .await
                {
                    Ok(_) => report.renewed += 1,
                    Err(err) if is_allowance_error(&err.to_string()) => {
                        debug!("Renewal of {} skipped: allowance", subscription.subscriber);
                        report.skipped_allowance += 1;
                    }
                    Err(err) => {
                        warn!("Renewal of {} failed: {}", subscription.subscriber, err);
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "Renew sweep on {}: scanned={} renewed={} skipped_allowance={} failed={}",
            project.id, report.scanned, report.renewed, report.skipped_allowance, report.failed
        );
        Ok(report)
    }

    /// First page of plans, shrinking the page size while the contract
    /// rejects it as too large.
    async fn list_checkout_plans(&self, contract_id: &str) -> soroban_client::Result<Value> {
        let mut sizes = CHECKOUT_PAGE_SIZES.iter().peekable();
        while let Some(&size) = sizes.next() {
            match self
                .ledger
                .invoke_view(contract_id, "list_plans", vec![ScArg::U32(0), ScArg::U32(size)])
                .await
            {
                Err(err)
                    if contract_code(&err) == Some(ContractError::InvalidPageSize)
                        && sizes.peek().is_some() =>
                {
                    debug!("Page size {} rejected, degrading", size);
                }
                other => return other,
            }
        }
        Ok(Value::Null)
    }

    pub async fn get_checkout_context(
        &self,
        project_id: &str,
        subscriber: Option<&str>,
    ) -> ServiceResult<CheckoutContext> {
        let project = self.checkout_project(project_id).await?;
        let contract_id = deployed_contract(&project)?;

        let plans_data = match self.list_checkout_plans(contract_id).await {
            Ok(value) => value,
            Err(err) if contract_code(&err) == Some(ContractError::NotInitialized) => {
                self.initialize_contract_if_possible(&project).await?;
                self.list_checkout_plans(contract_id)
                    .await
                    .map_err(|e| ServiceError::from_contract(&e))?
            }
            Err(err) => return Err(ServiceError::from_contract(&err)),
        };
        let plans: Vec<Plan> = items(&plans_data).iter().map(Plan::from_value).collect();

        let mut subscription = None;
        if let Some(address) = subscriber.map(str::trim).filter(|s| !s.is_empty()) {
            match self
                .ledger
                .invoke_view(contract_id, "get_subscription", vec![ScArg::address(address)])
                .await
            {
                Ok(value) if !value.is_null() => {
                    subscription = Some(Subscription::from_value(&value))
                }
                Ok(_) => {}
                Err(err) if contract_code(&err) == Some(ContractError::SubscriptionNotFound) => {}
                Err(err) => return Err(ServiceError::from_contract(&err)),
            }
        }

        let (remaining_allowance_stroops, remaining_cycles) = match &subscription {
            Some(sub) if sub.active => self.remaining_allowance(&project, sub, &plans).await,
            _ => (None, None),
        };

        Ok(CheckoutContext {
            project: CheckoutProject {
                id: project.id.clone(),
                name: project.name.clone(),
                network: project.network,
                payment_currency: project.payment_currency,
                subscription_contract_id: contract_id.to_string(),
            },
            remaining_allowance_stroops,
            remaining_cycles,
            plans,
            subscription,
        })
    }

    /// Best effort: any failure yields no figures rather than an error.
    async fn remaining_allowance(
        &self,
        project: &Project,
        subscription: &Subscription,
        plans: &[Plan],
    ) -> (Option<String>, Option<u64>) {
        let Some(token) = self.resolve_payment_token(project) else {
            return (None, None);
        };
        let Some(plan) = plans.iter().find(|p| p.id == subscription.plan_id) else {
            return (None, None);
        };
        let price = match parse_i128_like(&Value::String(plan.price_stroops.clone())) {
            Ok(price) if price > 0 => price,
            _ => return (None, None),
        };
        let Ok(contract_id) = deployed_contract(project) else {
            return (None, None);
        };

        let allowance = self
            .ledger
            .invoke_view(
                &token,
                "allowance",
                vec![
                    ScArg::address(subscription.subscriber.as_str()),
                    ScArg::address(contract_id),
                ],
            )
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| parse_i128_like(&value).map_err(|e| e.to_string()));

        match allowance {
            Ok(allowance) => (
                Some(allowance.to_string()),
                u64::try_from(allowance / price).ok(),
            ),
            Err(err) => {
                debug!("Allowance lookup for {} failed: {}", subscription.subscriber, err);
                (None, None)
            }
        }
    }

    pub async fn prepare_subscribe(
        &self,
        project_id: &str,
        input: PrepareSubscribeRequest,
    ) -> ServiceResult<PreparedTx> {
        let project = self.checkout_project(project_id).await?;
        let contract_id = deployed_contract(&project)?;
        let address = subscriber_address(&input.subscriber)?;

        let raw_plan = self
            .ledger
            .invoke_view(contract_id, "get_plan", vec![ScArg::U32(input.plan_id)])
            .await
            .map_err(|e| ServiceError::from_checkout(&e))?;
        if !Plan::from_value(&raw_plan).active {
            return Err(ServiceError::bad_request("Plan is inactive"));
        }

        self.ledger
            .prepare_unsigned_invoke(
                address,
                contract_id,
                "subscribe",
                vec![ScArg::address(address), ScArg::U32(input.plan_id)],
            )
            .await
            .map_err(|e| ServiceError::from_checkout(&e))
    }

    pub async fn prepare_cancel(&self, project_id: &str, subscriber: &str) -> ServiceResult<PreparedTx> {
        let project = self.checkout_project(project_id).await?;
        let contract_id = deployed_contract(&project)?;
        let address = subscriber_address(subscriber)?;

        self.ledger
            .prepare_unsigned_invoke(address, contract_id, "cancel", vec![ScArg::address(address)])
            .await
            .map_err(|e| ServiceError::from_checkout(&e))
    }

    /// Token `approve` so the contract can pull renewals.
    pub async fn prepare_renew_allowance(
        &self,
        project_id: &str,
        input: PrepareAllowanceRequest,
    ) -> ServiceResult<PreparedTx> {
        let project = self.checkout_project(project_id).await?;
        let contract_id = deployed_contract(&project)?;
        let token = self
            .resolve_payment_token(&project)
            .ok_or_else(|| ServiceError::bad_request("Project has no payment token contract configured"))?;
        let address = subscriber_address(&input.subscriber)?;
        let amount = match parse_i128_like(&input.amount_stroops) {
            Ok(amount) if amount > 0 => amount,
            _ => return Err(ServiceError::bad_request("amountStroops must be greater than 0")),
        };

        let latest = self.ledger.latest_ledger_sequence().await?;
        let expiration = clamp_allowance_expiration_ledger(latest, input.expiration_ledger)?;

        self.ledger
            .prepare_unsigned_invoke(
                address,
                &token,
                "approve",
                vec![
                    ScArg::address(address),
                    ScArg::address(contract_id),
                    ScArg::I128(amount),
                    ScArg::U32(expiration),
                ],
            )
            .await
            .map_err(|e| ServiceError::from_checkout(&e))
    }

    /// Raise the allowance by `additionalCycles` plan periods on top of what
    /// is left.
    pub async fn prepare_increase_allowance_cycles(
        &self,
        project_id: &str,
        input: PrepareIncreaseCyclesRequest,
    ) -> ServiceResult<IncreaseCyclesResponse> {
        let project = self.checkout_project(project_id).await?;
        let contract_id = deployed_contract(&project)?;
        let token = self
            .resolve_payment_token(&project)
            .ok_or_else(|| ServiceError::bad_request("Project has no payment token contract configured"))?;
        let address = subscriber_address(&input.subscriber)?;
        if input.additional_cycles <= 0 {
            return Err(ServiceError::bad_request("additionalCycles must be greater than 0"));
        }

        let raw_plan = self
            .ledger
            .invoke_view(contract_id, "get_plan", vec![ScArg::U32(input.plan_id)])
            .await
            .map_err(|e| ServiceError::from_checkout(&e))?;
        let plan = Plan::from_value(&raw_plan);
        let unit_price = parse_i128_like(&Value::String(plan.price_stroops))
            .map_err(|e| ServiceError::bad_request(e.to_string()))?;
        if unit_price <= 0 {
            return Err(ServiceError::bad_request("Plan price must be greater than 0"));
        }

        let raw_allowance = self
            .ledger
            .invoke_view(
                &token,
                "allowance",
                vec![ScArg::address(address), ScArg::address(contract_id)],
            )
            .await
            .map_err(|e| ServiceError::from_checkout(&e))?;
        let current = parse_i128_like(&raw_allowance)
            .map_err(|e| ServiceError::bad_request(e.to_string()))?;

        let new_allowance = unit_price
            .checked_mul(input.additional_cycles as i128)
            .and_then(|increase| current.checked_add(increase))
            .ok_or_else(|| ServiceError::bad_request("Allowance amount overflows i128"))?;

        let latest = self.ledger.latest_ledger_sequence().await?;
        let expiration = clamp_allowance_expiration_ledger(latest, None)?;

        let prepared = self
            .ledger
            .prepare_unsigned_invoke(
                address,
                &token,
                "approve",
                vec![
                    ScArg::address(address),
                    ScArg::address(contract_id),
                    ScArg::I128(new_allowance),
                    ScArg::U32(expiration),
                ],
            )
            .await
            .map_err(|e| ServiceError::from_checkout(&e))?;

        Ok(IncreaseCyclesResponse {
            prepared,
            expiration_ledger: expiration,
        })
    }

    pub async fn submit_user_signed_xdr(&self, signed_xdr: &str) -> ServiceResult<SubmittedTx> {
        let signed_xdr = signed_xdr.trim();
        if signed_xdr.is_empty() {
            return Err(ServiceError::bad_request("signedXdr is required"));
        }
        let submitted = self
            .ledger
            .submit_signed(signed_xdr)
            .await
            .map_err(|e| ServiceError::from_checkout(&e))?;
        info!("Submitted user transaction {}", submitted.tx_hash);
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_pagination_defaults() {
        assert_eq!(normalize_pagination(f64::NAN, f64::NAN), (0, 50));
        assert_eq!(normalize_pagination(-3.0, 0.0), (0, 50));
        assert_eq!(normalize_pagination(f64::INFINITY, -1.0), (0, 50));
    }

    #[test]
    fn test_normalize_pagination_floors_and_caps() {
        assert_eq!(normalize_pagination(7.9, 20.5), (7, 20));
        assert_eq!(normalize_pagination(0.0, 500.0), (0, 50));
        assert_eq!(normalize_pagination(10.0, 1.0), (10, 1));
    }

    #[test]
    fn test_normalize_pagination_bounds_hold() {
        for (offset, limit) in [(0.0, 0.5), (1e12, 1e12), (-0.0, 49.99), (3.0, 0.999)] {
            let (_, l) = normalize_pagination(offset, limit);
            assert!((1..=MAX_CONTRACT_PAGE_SIZE).contains(&l), "limit {} for {}", l, limit);
        }
    }

    #[test]
    fn test_clamp_defaults_to_window() {
        assert_eq!(
            clamp_allowance_expiration_ledger(100, None).unwrap(),
            100 + 3_110_400 - 1_000
        );
    }

    #[test]
    fn test_clamp_past_request_falls_back_to_window() {
        assert_eq!(
            clamp_allowance_expiration_ledger(5_000, Some(4_000)).unwrap(),
            5_000 + 3_110_400 - 1_000
        );
        assert_eq!(
            clamp_allowance_expiration_ledger(5_000, Some(5_000)).unwrap(),
            5_000 + 3_110_400 - 1_000
        );
    }

    #[test]
    fn test_clamp_keeps_requests_inside_window() {
        assert_eq!(clamp_allowance_expiration_ledger(5_000, Some(6_000)).unwrap(), 6_000);
        assert_eq!(
            clamp_allowance_expiration_ledger(5_000, Some(u32::MAX)).unwrap(),
            5_000 + 3_110_400 - 1_000
        );
    }

    #[test]
    fn test_clamp_fails_at_end_of_ledger_range() {
        let err = clamp_allowance_expiration_ledger(u32::MAX, None).unwrap_err();
        assert!(err.to_string().contains("too close to token max window 3110400"));
    }
}
