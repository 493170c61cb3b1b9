pub mod amount;
pub mod contract_error;
pub mod error;
pub mod hash32;
pub mod network;

pub use amount::parse_i128_like;
pub use contract_error::ContractError;
pub use error::{Error, Result};
pub use hash32::Hash32;
pub use network::{Network, PaymentCurrency};
