//! Soroban RPC client
//!
//! Builds, simulates, signs and submits Soroban contract transactions over
//! the Stellar JSON-RPC API. Consumers depend on the [`Ledger`] trait so they
//! can be driven by an in-memory double in tests.

pub mod args;
pub mod client;
pub mod error;
pub mod ledger;
pub mod native;
pub mod rpc;

pub use args::{Invocation, ScArg};
pub use client::{SorobanClient, SorobanConfig};
pub use error::{LedgerError, Result};
pub use ledger::{Ledger, PreparedDeploy, PreparedTx, SubmittedTx};
pub use native::sc_val_to_json;
