use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Unsupported payment currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Unexpected token amount format: {0}")]
    InvalidAmount(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
