//! Service error type rendered as JSON responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use soroban_client::LedgerError;
use subfy_common::contract_error::{self, ContractError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ServiceError::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    /// Owner-facing rejection: contract codes become their category message.
    pub fn from_contract(err: &LedgerError) -> Self {
        ServiceError::BadRequest(contract_error::translate(&err.to_string()))
    }

    /// Subscriber-facing rejection, keeping only unambiguous contract codes.
    pub fn from_checkout(err: &LedgerError) -> Self {
        ServiceError::BadRequest(contract_error::translate_checkout(&err.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if let ServiceError::Internal(message) = &self {
            tracing::error!("Internal error: {}", message);
        }
        let body = serde_json::json!({
            "error": self.to_string()
        });

        (self.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(format!("{:#}", err))
    }
}

/// Ledger failures that carry a contract code are client errors; anything
/// else (RPC outage, timeout) is an internal failure.
impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match ContractError::from_message(&message) {
            Some(code) => ServiceError::BadRequest(code.message()),
            None => ServiceError::Internal(message),
        }
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
