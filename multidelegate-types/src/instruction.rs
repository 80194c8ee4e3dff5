use crate::primitives::{Amount, DelegateId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DelegationInstruction {
    /// Unwind the sender's full position on every `sources` delegate and establish
    /// `amounts[i]` on `targets[i]`. Source amounts are read from the ledger.
    DelegateMulti {
        sources: Vec<DelegateId>,
        targets: Vec<DelegateId>,
        amounts: Vec<Amount>,
    },
    /// Set the processor's allowance over the sender's asset balance. Net inflows
    /// of `DelegateMulti` are pulled against this allowance.
    ApproveProcessor { amount: Amount },
}
