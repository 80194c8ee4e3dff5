pub mod asset;
pub mod ledger;
pub mod processor;
pub mod redistribution;
pub mod registry;
pub mod state;

#[cfg(test)]
mod tests;

pub use asset::{AssetBatch, AssetMove, TokenLedger, VotableAsset};
pub use ledger::DelegationLedger;
pub use processor::{BatchProcessor, DelegationEvent, DelegationReceipt};
pub use redistribution::{plan, redistribute};
pub use registry::{ProxyHandle, ProxyRegistry};
pub use state::{GlobalState, InvariantViolation};

use multidelegate_crypto::signatures::verify_call;
use multidelegate_types::primitives::short;
use multidelegate_types::{Address, AssetId, Call, DelegateId, DelegationError, DelegationInstruction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error(transparent)]
    Delegation(#[from] DelegationError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallReceipt {
    pub call_id: [u8; 32],
    pub sender: Address,
    pub nonce: u64,
    pub delegation: Option<DelegationReceipt>,
}

/// Where the proxy for `delegate` on `asset` lives. Pure; works before provisioning.
pub fn retrieve_proxy_contract_address(asset: &AssetId, delegate: &DelegateId) -> Address {
    multidelegate_crypto::derivation::proxy_address(asset, delegate)
}

/// Verifies and executes a signed call. The sender's nonce only advances when the
/// instruction succeeds; a failed call leaves the state untouched.
pub fn execute_call(call: &Call, state: &mut GlobalState) -> Result<CallReceipt, CallError> {
    verify_call(call)
        .map_err(|e| CallError::InvalidSignature(e.to_string()))?;

    let expected = state.nonce_of(&call.sender);
    if call.nonce != expected {
        return Err(CallError::InvalidNonce {
            expected,
            got: call.nonce,
        });
    }

    let delegation = match execute_instruction(&call.instruction, &call.sender, state) {
        Ok(d) => d,
        Err(e) => {
            warn!(sender = %short(&call.sender), nonce = call.nonce, error = %e, "Call rejected");
            return Err(e.into());
        }
    };
    state.accounts.entry(call.sender).or_default().nonce += 1;

    Ok(CallReceipt {
        call_id: call.id(),
        sender: call.sender,
        nonce: call.nonce,
        delegation,
    })
}

pub fn execute_instruction(
    instruction: &DelegationInstruction,
    sender: &Address,
    state: &mut GlobalState,
) -> Result<Option<DelegationReceipt>, DelegationError> {
    match instruction {
        DelegationInstruction::DelegateMulti {
            sources,
            targets,
            amounts,
        } => {
            let receipt = state.delegate_multi(sender, sources, targets, amounts)?;
            info!(
                sender = %short(sender),
                sources = sources.len(),
                targets = targets.len(),
                transfers = receipt.plan.len(),
                moves = receipt.moves.len(),
                "Delegations updated"
            );
            Ok(Some(receipt))
        }
        DelegationInstruction::ApproveProcessor { amount } => {
            let processor = *state.registry.processor();
            state.token.approve(*sender, processor, *amount);
            Ok(None)
        }
    }
}
