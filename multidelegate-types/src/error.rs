use crate::primitives::{Amount, DelegateId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which half of a `delegate_multi` call an id came from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Failures reported by the underlying votable asset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("account {} holds {available}, needs {required}", hex::encode(.account))]
    InsufficientBalance {
        account: [u8; 32],
        available: Amount,
        required: Amount,
    },
    #[error("allowance of {} is {available}, needs {required}", hex::encode(.owner))]
    InsufficientAllowance {
        owner: [u8; 32],
        available: Amount,
        required: Amount,
    },
    #[error("balance overflow")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    #[error("arity mismatch: expected {expected} entries, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("at least one source or target delegate is required")]
    EmptyBatch,
    #[error("zero amount for target {}", hex::encode(.0))]
    ZeroAmount(DelegateId),
    #[error("{side} delegate {} appears more than once", hex::encode(.delegate))]
    DuplicateDelegate { side: Side, delegate: DelegateId },
    #[error("nothing delegated to {}", hex::encode(.0))]
    NothingToWithdraw(DelegateId),
    #[error("insufficient balance on {}: have {available}, need {requested}", hex::encode(.delegate))]
    InsufficientBalance {
        delegate: DelegateId,
        available: Amount,
        requested: Amount,
    },
    #[error("asset movement failed: {0}")]
    AssetMovementFailed(#[from] AssetError),
    #[error("cannot provision proxy for {}: {reason}", hex::encode(.delegate))]
    ProxyProvisioningFailed {
        delegate: DelegateId,
        reason: String,
    },
    #[error("amount overflow")]
    Overflow,
}

impl DelegationError {
    /// Fatal errors are defects in configuration or arithmetic bounds rather than
    /// bad input; callers should halt instead of reporting them as a rejected call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DelegationError::ProxyProvisioningFailed { .. } | DelegationError::Overflow
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_provisioning_and_overflow_are_fatal() {
        assert!(DelegationError::Overflow.is_fatal());
        assert!(DelegationError::ProxyProvisioningFailed {
            delegate: [0u8; 32],
            reason: "reserved".into(),
        }
        .is_fatal());
        assert!(!DelegationError::EmptyBatch.is_fatal());
        assert!(!DelegationError::NothingToWithdraw([1u8; 32]).is_fatal());
        assert!(!DelegationError::from(AssetError::Overflow).is_fatal());
    }

    #[test]
    fn duplicate_message_names_side() {
        let e = DelegationError::DuplicateDelegate {
            side: Side::Target,
            delegate: [0u8; 32],
        };
        assert!(e.to_string().starts_with("target delegate"));
    }
}
