//! Typed contract call arguments.

use stellar_strkey::{ed25519::PublicKey as StrkeyPublicKey, Contract};
use stellar_xdr::curr::{
    AccountId, ContractId, Hash, Int128Parts, PublicKey, ScAddress, ScString, ScSymbol, ScVal,
    StringM, Uint256,
};

use crate::error::{LedgerError, Result};

/// A single argument passed to a contract function.
///
/// The set is closed: these are the only shapes the subscription and token
/// contracts take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScArg {
    U32(u32),
    I128(i128),
    Bool(bool),
    /// `G...` account or `C...` contract strkey
    Address(String),
    Symbol(String),
    String(String),
}

impl ScArg {
    pub fn address(value: impl Into<String>) -> Self {
        ScArg::Address(value.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        ScArg::String(value.into())
    }

    pub fn to_sc_val(&self) -> Result<ScVal> {
        match self {
            ScArg::U32(v) => Ok(ScVal::U32(*v)),
            ScArg::I128(v) => Ok(ScVal::I128(Int128Parts {
                hi: (*v >> 64) as i64,
                lo: *v as u64,
            })),
            ScArg::Bool(v) => Ok(ScVal::Bool(*v)),
            ScArg::Address(v) => Ok(ScVal::Address(parse_address(v)?)),
            ScArg::Symbol(v) => {
                let sym: StringM<32> = v.as_bytes().to_vec().try_into().map_err(|_| {
                    LedgerError::InvalidArgument(format!("symbol too long: {}", v))
                })?;
                Ok(ScVal::Symbol(ScSymbol(sym)))
            }
            ScArg::String(v) => {
                let s: StringM = v.as_bytes().to_vec().try_into().map_err(|_| {
                    LedgerError::InvalidArgument("string argument too long".to_string())
                })?;
                Ok(ScVal::String(ScString(s)))
            }
        }
    }
}

/// One contract call inside a batch transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub contract_id: String,
    pub method: String,
    pub args: Vec<ScArg>,
}

impl Invocation {
    pub fn new(contract_id: impl Into<String>, method: impl Into<String>, args: Vec<ScArg>) -> Self {
        Self {
            contract_id: contract_id.into(),
            method: method.into(),
            args,
        }
    }
}

/// Parse a strkey into a contract-level address.
pub fn parse_address(value: &str) -> Result<ScAddress> {
    let value = value.trim();
    if value.starts_with('G') {
        let key = StrkeyPublicKey::from_string(value)
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", value, e)))?;
        Ok(ScAddress::Account(account_id(key.0)))
    } else if value.starts_with('C') {
        let contract = Contract::from_string(value)
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", value, e)))?;
        Ok(contract_address(contract.0))
    } else {
        Err(LedgerError::InvalidAddress(value.to_string()))
    }
}

/// Decode a `G...` strkey into raw ed25519 public key bytes.
pub fn account_key_bytes(value: &str) -> Result<[u8; 32]> {
    StrkeyPublicKey::from_string(value.trim())
        .map(|k| k.0)
        .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", value, e)))
}

pub(crate) fn account_id(key: [u8; 32]) -> AccountId {
    AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key)))
}

pub(crate) fn contract_address(id: [u8; 32]) -> ScAddress {
    ScAddress::Contract(ContractId(Hash(id)))
}
