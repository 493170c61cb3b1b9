use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::{Invocation, ScArg};
use crate::error::Result;

/// Unsigned transaction ready for a wallet to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTx {
    pub unsigned_xdr: String,
    pub network_passphrase: String,
}

/// Unsigned contract deployment plus the salt it was built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedDeploy {
    pub unsigned_xdr: String,
    pub salt_hex: String,
}

/// A transaction confirmed by the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedTx {
    pub tx_hash: String,
    /// Set when the transaction returned a contract address (deployments).
    pub contract_id: Option<String>,
}

/// Everything the billing backend needs from the ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Public key (`G...`) of the backend signer.
    fn backend_public_key(&self) -> &str;

    fn network_passphrase(&self) -> &str;

    /// Simulate a read-only call. Never submits.
    async fn invoke_view(&self, contract_id: &str, method: &str, args: Vec<ScArg>)
        -> Result<Value>;

    /// Call a contract as the backend signer and wait for confirmation.
    async fn invoke_signed(
        &self,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<SubmittedTx>;

    async fn prepare_unsigned_invoke(
        &self,
        source: &str,
        contract_id: &str,
        method: &str,
        args: Vec<ScArg>,
    ) -> Result<PreparedTx>;

    async fn prepare_unsigned_batch_invoke(
        &self,
        source: &str,
        invocations: Vec<Invocation>,
    ) -> Result<PreparedTx>;

    async fn prepare_deploy_contract(&self, owner: &str, wasm_hash_hex: &str)
        -> Result<PreparedDeploy>;

    /// Submit a transaction signed elsewhere and wait for confirmation.
    async fn submit_signed(&self, signed_xdr: &str) -> Result<SubmittedTx>;

    async fn latest_ledger_sequence(&self) -> Result<u32>;
}
