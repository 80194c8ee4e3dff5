use crate::primitives::{Amount, DelegateId};
use serde::{Deserialize, Serialize};

/// One `(delegate, amount)` pair of an allocation. Allocations are ordered slices
/// of these and only live for the duration of a call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEntry {
    pub delegate: DelegateId,
    pub amount: Amount,
}

impl AllocationEntry {
    pub fn new(delegate: DelegateId, amount: Amount) -> Self {
        Self { delegate, amount }
    }
}

/// A single step of a redistribution plan.
///
/// `from: None` pulls the amount from the depositor's own holdings, `to: None`
/// pushes it back to the depositor. Both being `None` never happens.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferInstruction {
    pub from: Option<DelegateId>,
    pub to: Option<DelegateId>,
    pub amount: Amount,
}

impl TransferInstruction {
    pub fn new(from: Option<DelegateId>, to: Option<DelegateId>, amount: Amount) -> Self {
        Self { from, to, amount }
    }

    pub fn is_inflow(&self) -> bool {
        self.from.is_none()
    }

    pub fn is_outflow(&self) -> bool {
        self.to.is_none()
    }
}
