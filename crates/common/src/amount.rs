use serde_json::Value;

use crate::error::{Error, Result};

/// Read a token amount that may arrive as a JSON number or a decimal string.
///
/// i128 values are decoded from the ledger as strings to avoid losing
/// precision, while smaller integers come through as numbers.
pub fn parse_i128_like(value: &Value) -> Result<i128> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(v as i128)
            } else if let Some(v) = n.as_u64() {
                Ok(v as i128)
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i128)
                    .ok_or_else(|| Error::InvalidAmount(n.to_string()))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i128>()
            .map_err(|_| Error::InvalidAmount(s.clone())),
        other => Err(Error::InvalidAmount(other.to_string())),
    }
}
