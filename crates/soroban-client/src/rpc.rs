//! Soroban JSON-RPC wire types and transport.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{LedgerError, Result};

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct GetLatestLedgerResult {
    pub sequence: u32,
}

#[derive(Debug, Serialize)]
pub struct TransactionParams {
    pub transaction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateTransactionResult {
    pub min_resource_fee: Option<String>,
    /// SorobanTransactionData XDR (base64)
    pub transaction_data: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<SimulateHostFunctionResult>,
}

#[derive(Debug, Deserialize)]
pub struct SimulateHostFunctionResult {
    pub xdr: Option<String>,
    #[serde(default)]
    pub auth: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionResult {
    pub status: String,
    pub hash: String,
    pub error_result_xdr: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetTransactionParams {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionResult {
    pub status: String,
    pub ledger: Option<u32>,
    pub result_xdr: Option<String>,
    /// TransactionMeta XDR (base64), V3 before protocol 23 and V4 after
    pub result_meta_xdr: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetLedgerEntriesParams {
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetLedgerEntriesResult {
    #[serde(default)]
    pub entries: Option<Vec<LedgerEntryResult>>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerEntryResult {
    /// LedgerEntryData XDR (base64)
    pub xdr: String,
}

/// JSON-RPC 2.0 request/response exchange with a Soroban RPC node.
///
/// Params and results travel as raw JSON; [`call`] and [`call_no_params`]
/// add the typed layer on top.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    fn url(&self) -> &str;

    /// Send one request. `params: None` omits the field entirely.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;
}

pub async fn call<P: Serialize, R: DeserializeOwned>(
    transport: &dyn RpcTransport,
    method: &str,
    params: P,
) -> Result<R> {
    let params = serde_json::to_value(params)
        .map_err(|e| LedgerError::Rpc(format!("{} params: {}", method, e)))?;
    decode_result(method, transport.request(method, Some(params)).await?)
}

/// Some methods (getLatestLedger) reject an empty params object.
pub async fn call_no_params<R: DeserializeOwned>(
    transport: &dyn RpcTransport,
    method: &str,
) -> Result<R> {
    decode_result(method, transport.request(method, None).await?)
}

fn decode_result<R: DeserializeOwned>(method: &str, result: Value) -> Result<R> {
    serde_json::from_value(result)
        .map_err(|e| LedgerError::Rpc(format!("{} returned an unexpected result: {}", method, e)))
}

/// Transport over HTTP.
#[derive(Debug)]
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        tracing::debug!(method, url = %self.url, "Soroban RPC request");

        let response: RpcResponse<Value> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(LedgerError::Rpc(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }

        response
            .result
            .ok_or_else(|| LedgerError::Rpc(format!("{} returned an empty result", method)))
    }
}
