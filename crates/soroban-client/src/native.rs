//! Decoding of contract return values into plain JSON.

use serde_json::{Map, Value};
use stellar_strkey::{ed25519::PublicKey as StrkeyPublicKey, Contract};
use stellar_xdr::curr::{AccountId, ContractId, Hash, PublicKey, ScAddress, ScVal, Uint256};

/// Convert a contract value to JSON.
///
/// 128-bit integers become decimal strings so token amounts survive the trip
/// through `serde_json`. Struct-like contract types arrive as symbol-keyed
/// maps and become objects.
pub fn sc_val_to_json(val: &ScVal) -> Value {
    match val {
        ScVal::Void => Value::Null,
        ScVal::Bool(b) => Value::Bool(*b),
        ScVal::U32(v) => Value::from(*v),
        ScVal::I32(v) => Value::from(*v),
        ScVal::U64(v) => Value::from(*v),
        ScVal::I64(v) => Value::from(*v),
        ScVal::Timepoint(t) => Value::from(t.0),
        ScVal::Duration(d) => Value::from(d.0),
        ScVal::U128(p) => Value::String((((p.hi as u128) << 64) | p.lo as u128).to_string()),
        ScVal::I128(p) => Value::String((((p.hi as i128) << 64) | p.lo as i128).to_string()),
        ScVal::Address(addr) => Value::String(address_to_strkey(addr)),
        ScVal::Symbol(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::String(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::Bytes(b) => Value::String(hex::encode(b.0.as_slice())),
        ScVal::Vec(items) => Value::Array(
            items
                .as_ref()
                .map(|v| v.0.iter().map(sc_val_to_json).collect())
                .unwrap_or_default(),
        ),
        ScVal::Map(entries) => {
            let mut object = Map::new();
            if let Some(entries) = entries {
                for entry in entries.0.iter() {
                    object.insert(map_key(&entry.key), sc_val_to_json(&entry.val));
                }
            }
            Value::Object(object)
        }
        other => Value::String(format!("{:?}", other)),
    }
}

pub fn address_to_strkey(addr: &ScAddress) -> String {
    match addr {
        ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key)))) => {
            StrkeyPublicKey(*key).to_string()
        }
        ScAddress::Contract(ContractId(Hash(id))) => Contract(*id).to_string(),
        // muxed accounts, claimable balances and pools never reach our contracts
        other => format!("{:?}", other),
    }
}

/// The `C...` strkey held by a contract address value, if that is what it is.
pub fn contract_strkey(val: &ScVal) -> Option<String> {
    match val {
        ScVal::Address(ScAddress::Contract(ContractId(Hash(id)))) => Some(Contract(*id).to_string()),
        _ => None,
    }
}

fn map_key(key: &ScVal) -> String {
    match sc_val_to_json(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
