use thiserror::Error;

/// Failures talking to the ledger.
///
/// Simulation and submission errors keep the raw text returned by the RPC
/// node, since contract rejections (`Error(Contract, #N)`) are only visible
/// there.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Missing signer secret (SB_BACKEND_SIGNER_SECRET or STELLAR_SERVER_SECRET)")]
    MissingSigner,

    #[error("Invalid signer secret: {0}")]
    InvalidSigner(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid XDR encoding: {0}")]
    InvalidXdr(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("{0}")]
    Simulation(String),

    #[error("sendTransaction returned {status}: {detail}")]
    Submission { status: String, detail: String },

    #[error("Transaction {hash} failed: {detail}")]
    TransactionFailed { hash: String, detail: String },

    #[error("Transaction {hash} not confirmed after {attempts} attempts")]
    Timeout { hash: String, attempts: u32 },

    #[error("At least one invocation is required")]
    EmptyBatch,

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(e: reqwest::Error) -> Self {
        LedgerError::Rpc(e.to_string())
    }
}

impl From<stellar_xdr::curr::Error> for LedgerError {
    fn from(e: stellar_xdr::curr::Error) -> Self {
        LedgerError::InvalidXdr(e.to_string())
    }
}

impl From<base64::DecodeError> for LedgerError {
    fn from(e: base64::DecodeError) -> Self {
        LedgerError::InvalidXdr(format!("Base64 decode failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
