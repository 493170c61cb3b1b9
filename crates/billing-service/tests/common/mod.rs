//! Shared fixtures: in-memory store and a scripted ledger

#![allow(dead_code)]

use async_trait::async_trait;
use billing_service::records::{ContractsUpdate, NewProject, Projects};
use billing_service::storage::{DocumentStore, MemoryStore};
use billing_service::tasks::{InlineDispatcher, TaskDispatcher};
use billing_service::{AppState, ServiceSettings};
use billing_service::models::Project;
use billing_service::config::PaymentTokenConfig;
use serde_json::Value;
use soroban_client::{
    Invocation, Ledger, LedgerError, PreparedDeploy, PreparedTx, Result, ScArg, SubmittedTx,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use subfy_common::{Network, PaymentCurrency};

pub const OWNER: &str = "GOWNER";
pub const OTHER_OWNER: &str = "GINTRUDER";
pub const BACKEND: &str = "GBACKEND";
pub const CONTRACT: &str = "CSUBSCRIPTION";
pub const TOKEN: &str = "CTOKEN";
pub const TREASURY: &str = "GTREASURY";
pub const SUBSCRIBER: &str = "GSUBSCRIBER";
pub const PASSPHRASE: &str = "Test SDF Network ; September 2015";
pub const JWT_SECRET: &str = "test-secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    View,
    Signed,
    Prepare,
    Deploy,
    Submit,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub contract_id: String,
    pub method: String,
    pub args: Vec<ScArg>,
}

/// Ledger double. Responses are scripted per method and consumed in order;
/// an unscripted method answers `null` (views) or a plain success.
pub struct MockLedger {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<HashMap<String, VecDeque<std::result::Result<Value, String>>>>,
    submissions: Mutex<VecDeque<std::result::Result<SubmittedTx, String>>>,
    latest_ledger: AtomicU32,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            submissions: Mutex::new(VecDeque::new()),
            latest_ledger: AtomicU32::new(1_000),
        }
    }

    pub fn respond(&self, method: &str, value: Value) -> &Self {
        self.push(method, Ok(value))
    }

    /// Fail the next `method` call with a message like `Error(Contract, #N)`.
    pub fn fail(&self, method: &str, message: &str) -> &Self {
        self.push(method, Err(message.to_string()))
    }

    fn push(&self, method: &str, response: std::result::Result<Value, String>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn submission(&self, response: std::result::Result<SubmittedTx, String>) -> &Self {
        self.submissions.lock().unwrap().push_back(response);
        self
    }

    pub fn set_latest_ledger(&self, ledger: u32) {
        self.latest_ledger.store(ledger, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    fn record(&self, kind: CallKind, contract_id: &str, method: &str, args: Vec<ScArg>) {
        self.calls.lock().unwrap().push(Call {
            kind,
            contract_id: contract_id.to_string(),
            method: method.to_string(),
            args,
        });
    }

    fn next(&self, method: &str) -> Result<Value> {
        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(LedgerError::Simulation(message)),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn backend_public_key(&self) -> &str {
        BACKEND
    }

    fn network_passphrase(&self) -> &str {
        PASSPHRASE
    }

    async fn invoke_view(&self, contract_id: &str, method: &str, args: Vec<ScArg>) -> Result<Value> {
        self.record(CallKind::View, contract_id, method, args);
        self.next(method)
    }

    async fn invoke_signed(
        &self,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<SubmittedTx> {
        self.record(CallKind::Signed, contract_id, method, args);
        self.next(method).map(|_| SubmittedTx {
            tx_hash: format!("tx-{}", method),
            contract_id: None,
        })
    }

    async fn prepare_unsigned_invoke(
        &self,
        _source: &str,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<PreparedTx> {
        self.record(CallKind::Prepare, contract_id, method, args);
        self.next(method).map(|_| PreparedTx {
            unsigned_xdr: format!("unsigned-{}", method),
            network_passphrase: PASSPHRASE.to_string(),
        })
    }

    async fn prepare_unsigned_batch_invoke(
        &self,
        source: &str,
        invocations: Vec<Invocation>,
    ) -> Result<PreparedTx> {
        if invocations.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        for invocation in invocations {
            self.record(
                CallKind::Prepare,
                &invocation.contract_id,
                &invocation.method,
                invocation.args,
            );
        }
        Ok(PreparedTx {
            unsigned_xdr: format!("unsigned-batch-{}", source),
            network_passphrase: PASSPHRASE.to_string(),
        })
    }

    async fn prepare_deploy_contract(&self, owner: &str, wasm_hash_hex: &str) -> Result<PreparedDeploy> {
        self.record(
            CallKind::Deploy,
            "",
            "deploy",
            vec![ScArg::address(owner), ScArg::string(wasm_hash_hex)],
        );
        Ok(PreparedDeploy {
            unsigned_xdr: "unsigned-deploy".to_string(),
            salt_hex: "ab".repeat(32),
        })
    }

    async fn submit_signed(&self, signed_xdr: &str) -> Result<SubmittedTx> {
        self.record(CallKind::Submit, "", "submit", vec![ScArg::string(signed_xdr)]);
        match self.submissions.lock().unwrap().pop_front() {
            Some(Ok(tx)) => Ok(tx),
            Some(Err(message)) => Err(LedgerError::Simulation(message)),
            None => Ok(SubmittedTx {
                tx_hash: "tx-submit".to_string(),
                contract_id: None,
            }),
        }
    }

    async fn latest_ledger_sequence(&self) -> Result<u32> {
        Ok(self.latest_ledger.load(Ordering::SeqCst))
    }
}

pub fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(MemoryStore::new())
}

pub fn settings() -> ServiceSettings {
    ServiceSettings {
        jwt_secret: JWT_SECRET.to_string(),
        payment_tokens: PaymentTokenConfig::default(),
        internal_tasks_token: None,
        wasm_releases_internal_token: None,
    }
}

/// App state with inline deployment dispatch.
pub fn app_state(store: Arc<dyn DocumentStore>, ledger: Arc<MockLedger>, settings: ServiceSettings) -> AppState {
    AppState::new(store, ledger, settings, |executor| {
        let dispatcher: Arc<dyn TaskDispatcher> = Arc::new(InlineDispatcher::new(executor));
        dispatcher
    })
}

/// Project owned by [`OWNER`], optionally with a deployed contract and token.
pub async fn seed_project(
    store: &Arc<dyn DocumentStore>,
    contract: Option<&str>,
    token: Option<&str>,
) -> Project {
    let projects = Projects::new(store.clone());
    let project = projects
        .create(NewProject {
            owner_public_key: OWNER.to_string(),
            name: "Acme".to_string(),
            network: Network::Testnet,
            payment_currency: PaymentCurrency::Usdc,
            treasury_address: TREASURY.to_string(),
            payment_token_contract_id: token.map(str::to_string),
        })
        .await
        .unwrap();
    if let Some(contract) = contract {
        projects
            .update_contracts(
                &project.id,
                ContractsUpdate {
                    subscription_contract_id: Some(contract.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }
    projects.find(&project.id).await.unwrap().unwrap()
}

pub fn addr(value: &str) -> ScArg {
    ScArg::address(value)
}
