//! Classification of subscription-contract rejections.
//!
//! Soroban surfaces contract panics as text such as
//! `HostError: Error(Contract, #2)`. The numeric code is the only stable part
//! of that message, so everything here keys off it.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static CONTRACT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error\(Contract,\s*#(\d+)\)").expect("contract error pattern is valid")
});

/// Known error codes of the `sb_subscription` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractError {
    AlreadyInitialized,
    NotInitialized,
    Unauthorized,
    PlanExists,
    PlanNotFound,
    InvalidPeriod,
    PlanInactive,
    SubscriptionExists,
    SubscriptionNotFound,
    SubscriptionCancelled,
    InvalidPrice,
    RenewalTooEarly,
    InvalidPageSize,
    Unknown(u32),
}

impl ContractError {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ContractError::AlreadyInitialized,
            2 => ContractError::NotInitialized,
            3 => ContractError::Unauthorized,
            4 => ContractError::PlanExists,
            5 => ContractError::PlanNotFound,
            6 => ContractError::InvalidPeriod,
            7 => ContractError::PlanInactive,
            8 => ContractError::SubscriptionExists,
            9 => ContractError::SubscriptionNotFound,
            10 => ContractError::SubscriptionCancelled,
            11 => ContractError::InvalidPrice,
            12 => ContractError::RenewalTooEarly,
            13 => ContractError::InvalidPageSize,
            other => ContractError::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ContractError::AlreadyInitialized => 1,
            ContractError::NotInitialized => 2,
            ContractError::Unauthorized => 3,
            ContractError::PlanExists => 4,
            ContractError::PlanNotFound => 5,
            ContractError::InvalidPeriod => 6,
            ContractError::PlanInactive => 7,
            ContractError::SubscriptionExists => 8,
            ContractError::SubscriptionNotFound => 9,
            ContractError::SubscriptionCancelled => 10,
            ContractError::InvalidPrice => 11,
            ContractError::RenewalTooEarly => 12,
            ContractError::InvalidPageSize => 13,
            ContractError::Unknown(code) => *code,
        }
    }

    /// Extract the contract error embedded in an error message, if any.
    pub fn from_message(message: &str) -> Option<Self> {
        parse_contract_error_code(message).map(Self::from_code)
    }

    pub fn message(&self) -> String {
        let text = match self {
            ContractError::AlreadyInitialized => "Contract already initialized",
            ContractError::NotInitialized => "Contract is not initialized yet",
            ContractError::Unauthorized => "Unauthorized contract action",
            ContractError::PlanExists => "Plan already exists",
            ContractError::PlanNotFound => "Plan not found",
            ContractError::InvalidPeriod => "Invalid period",
            ContractError::PlanInactive => "Plan is inactive",
            ContractError::SubscriptionExists => "Subscription already exists",
            ContractError::SubscriptionNotFound => "Subscription not found",
            ContractError::SubscriptionCancelled => "Subscription is cancelled",
            ContractError::InvalidPrice => "Invalid price",
            ContractError::RenewalTooEarly => "Renewal is too early",
            ContractError::InvalidPageSize => "Invalid page size",
            ContractError::Unknown(code) => {
                return format!("Contract rejected action (code #{})", code)
            }
        };
        text.to_string()
    }

    /// Codes that can only come from the subscription contract itself.
    ///
    /// Checkout transactions also run token-contract code (`transfer_from`,
    /// `approve`), whose error numbers overlap with ours.
    fn is_unambiguous_for_checkout(&self) -> bool {
        matches!(
            self,
            ContractError::NotInitialized
                | ContractError::PlanNotFound
                | ContractError::PlanInactive
                | ContractError::SubscriptionExists
                | ContractError::SubscriptionNotFound
                | ContractError::SubscriptionCancelled
                | ContractError::RenewalTooEarly
        )
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Extract `N` from `Error(Contract, #N)`.
pub fn parse_contract_error_code(message: &str) -> Option<u32> {
    CONTRACT_CODE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Human-readable message for an owner-side failure. Messages without a
/// contract code are returned unchanged.
pub fn translate(message: &str) -> String {
    match ContractError::from_message(message) {
        Some(err) => err.message(),
        None => message.to_string(),
    }
}

/// Human-readable message for a subscriber-side (checkout) failure.
pub fn translate_checkout(message: &str) -> String {
    match ContractError::from_message(message) {
        Some(err) if err.is_unambiguous_for_checkout() => err.message(),
        Some(err) => format!(
            "Transaction rejected by contract (code #{}). \
             Check wallet trustline, token balance, and allowance.",
            err.code()
        ),
        None => message.to_string(),
    }
}

/// Whether a renewal failed because the subscriber's token allowance ran out.
///
/// The token contract reports this as free text, not as a code, so this
/// breaks if the token contract rewords its panic message.
pub fn is_allowance_error(message: &str) -> bool {
    message.to_lowercase().contains("not enough allowance")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_code_from_host_error() {
        let msg = "HostError: Error(Contract, #2)\n\nEvent log (newest first): ...";
        assert_eq!(parse_contract_error_code(msg), Some(2));
        assert_eq!(
            ContractError::from_message(msg),
            Some(ContractError::NotInitialized)
        );
    }

    #[test]
    fn test_extracts_code_without_space() {
        assert_eq!(parse_contract_error_code("Error(Contract,#13)"), Some(13));
    }

    #[test]
    fn test_every_known_code_maps_back() {
        for code in 1..=13 {
            let err = ContractError::from_code(code);
            assert!(!matches!(err, ContractError::Unknown(_)));
            assert_eq!(err.code(), code);
        }
        assert_eq!(ContractError::from_code(42), ContractError::Unknown(42));
    }

    #[test]
    fn test_translate_keeps_plain_messages() {
        assert_eq!(translate("connection refused"), "connection refused");
        assert_eq!(translate("Error(Contract, #4)"), "Plan already exists");
        assert_eq!(
            translate("Error(Contract, #77)"),
            "Contract rejected action (code #77)"
        );
    }

    #[test]
    fn test_checkout_translation_is_conservative() {
        assert_eq!(translate_checkout("Error(Contract, #7)"), "Plan is inactive");
        let generic = translate_checkout("Error(Contract, #3)");
        assert!(generic.starts_with("Transaction rejected by contract (code #3)."));
        assert!(generic.contains("trustline"));
        assert_eq!(translate_checkout("timeout"), "timeout");
    }

    #[test]
    fn test_allowance_error_detection() {
        assert!(is_allowance_error(
            "HostError: Error(WasmVm, InvalidAction) ... \"Not enough allowance to spend\""
        ));
        assert!(!is_allowance_error("Error(Contract, #12)"));
    }
}
