//! `delegate_multi`: validate, plan, stage, settle, commit.
//!
//! Every check that can reject a call runs before anything is written. The asset
//! batch is the only fallible write and is applied atomically; registry and ledger
//! commits after it cannot fail.

use crate::asset::{AssetBatch, AssetMove, VotableAsset};
use crate::ledger::DelegationLedger;
use crate::redistribution::redistribute;
use crate::registry::{ProxyHandle, ProxyRegistry};
use multidelegate_types::primitives::short;
use multidelegate_types::{
    Address, AllocationEntry, Amount, AssetError, DelegateId, DelegationError, SettlementMode,
    Side, TransferInstruction,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum DelegationEvent {
    ProxyDeployed {
        delegate: DelegateId,
        proxy: Address,
    },
    DelegationProcessed {
        from: Option<DelegateId>,
        to: Option<DelegateId>,
        amount: Amount,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DelegationReceipt {
    pub plan: Vec<TransferInstruction>,
    pub moves: Vec<AssetMove>,
    pub events: Vec<DelegationEvent>,
}

pub struct BatchProcessor<'a, A: VotableAsset> {
    registry: &'a mut ProxyRegistry,
    ledger: &'a mut DelegationLedger,
    asset: &'a mut A,
    settlement: SettlementMode,
}

impl<'a, A: VotableAsset> BatchProcessor<'a, A> {
    pub fn new(
        registry: &'a mut ProxyRegistry,
        ledger: &'a mut DelegationLedger,
        asset: &'a mut A,
        settlement: SettlementMode,
    ) -> Self {
        Self {
            registry,
            ledger,
            asset,
            settlement,
        }
    }

    /// Unwinds `caller`'s whole position on each of `sources` and establishes
    /// `amounts[i]` on `targets[i]`, moving the underlying asset only as far as needed.
    pub fn delegate_multi(
        &mut self,
        caller: &Address,
        sources: &[DelegateId],
        targets: &[DelegateId],
        amounts: &[Amount],
    ) -> Result<DelegationReceipt, DelegationError> {
        validate_shape(sources, targets, amounts)?;

        let source_alloc = sources
            .iter()
            .map(|delegate| match self.ledger.balance_of(caller, delegate) {
                0 => Err(DelegationError::NothingToWithdraw(*delegate)),
                amount => Ok(AllocationEntry::new(*delegate, amount)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let target_alloc: Vec<AllocationEntry> = targets
            .iter()
            .zip(amounts)
            .map(|(delegate, amount)| AllocationEntry::new(*delegate, *amount))
            .collect();

        let plan: Vec<TransferInstruction> = redistribute(&source_alloc, &target_alloc).collect();

        // Every target gets a proxy, even one whose net movement is zero.
        let mut fresh: Vec<ProxyHandle> = Vec::new();
        for delegate in targets {
            if !self.registry.is_provisioned(delegate) {
                let handle = self.registry.resolve_pending(delegate, &fresh)?;
                fresh.push(handle);
            }
        }

        self.check_funding(caller, &plan)?;

        let mut stage = self.ledger.stage(*caller);
        for instruction in &plan {
            if let Some(from) = &instruction.from {
                stage.debit(from, instruction.amount)?;
            }
            if let Some(to) = &instruction.to {
                stage.credit(to, instruction.amount)?;
            }
        }
        let writes = stage.finish();

        let flows = self.flows(caller, &plan);
        let moves = match self.settlement {
            SettlementMode::Sequential => flows,
            SettlementMode::Netted => net_moves(&flows, caller, self.registry.processor())?,
        };
        let batch = AssetBatch {
            provisions: fresh.iter().map(|h| (h.address, h.delegate)).collect(),
            moves,
        };
        self.asset.execute_batch(self.registry.processor(), &batch)?;

        let mut events = Vec::with_capacity(fresh.len() + plan.len());
        for handle in fresh {
            if self.registry.insert(handle) {
                events.push(DelegationEvent::ProxyDeployed {
                    delegate: handle.delegate,
                    proxy: handle.address,
                });
            }
        }
        self.ledger.apply(writes);
        for instruction in &plan {
            debug!(
                from = ?instruction.from.as_ref().map(short),
                to = ?instruction.to.as_ref().map(short),
                amount = %instruction.amount,
                "Delegation processed"
            );
            events.push(DelegationEvent::DelegationProcessed {
                from: instruction.from,
                to: instruction.to,
                amount: instruction.amount,
            });
        }

        Ok(DelegationReceipt {
            plan,
            moves: batch.moves,
            events,
        })
    }

    /// The caller's wallet must cover everything the plan draws from it before any
    /// ledger or netting arithmetic runs, so an unfundable call fails the same way in
    /// every settlement mode.
    fn check_funding(
        &self,
        caller: &Address,
        plan: &[TransferInstruction],
    ) -> Result<(), DelegationError> {
        let required = plan
            .iter()
            .filter(|i| i.from.is_none())
            .fold(0 as Amount, |acc, i| acc.saturating_add(i.amount));
        if required == 0 {
            return Ok(());
        }

        let available = self.asset.balance_of(caller);
        if available < required {
            return Err(AssetError::InsufficientBalance {
                account: *caller,
                available,
                required,
            }
            .into());
        }
        let allowance = self.asset.allowance(caller, self.registry.processor());
        if allowance != Amount::MAX && allowance < required {
            return Err(AssetError::InsufficientAllowance {
                owner: *caller,
                available: allowance,
                required,
            }
            .into());
        }
        Ok(())
    }

    /// One asset movement per instruction, in plan order.
    fn flows(&self, caller: &Address, plan: &[TransferInstruction]) -> Vec<AssetMove> {
        let account = |delegate: &Option<DelegateId>| match delegate {
            Some(d) => self.registry.address_of(d),
            None => *caller,
        };
        plan.iter()
            .map(|i| AssetMove::new(account(&i.from), account(&i.to), i.amount))
            .collect()
    }
}

fn validate_shape(
    sources: &[DelegateId],
    targets: &[DelegateId],
    amounts: &[Amount],
) -> Result<(), DelegationError> {
    if targets.len() != amounts.len() {
        return Err(DelegationError::ArityMismatch {
            expected: targets.len(),
            actual: amounts.len(),
        });
    }
    if sources.is_empty() && targets.is_empty() {
        return Err(DelegationError::EmptyBatch);
    }
    if let Some(i) = amounts.iter().position(|a| *a == 0) {
        return Err(DelegationError::ZeroAmount(targets[i]));
    }
    for (side, ids) in [(Side::Source, sources), (Side::Target, targets)] {
        let mut seen = BTreeSet::new();
        for delegate in ids {
            if !seen.insert(delegate) {
                return Err(DelegationError::DuplicateDelegate {
                    side,
                    delegate: *delegate,
                });
            }
        }
    }
    Ok(())
}

/// Collapses `flows` into at most one movement per proxy.
///
/// One payer and one payee settle directly, as does the caller's wallet when it is
/// the only payer or the only payee. Everything else pays into `escrow` and is paid
/// out of it, leaving it empty.
fn net_moves(
    flows: &[AssetMove],
    caller: &Address,
    escrow: &Address,
) -> Result<Vec<AssetMove>, DelegationError> {
    fn slot(book: &mut Vec<(Address, Amount, Amount)>, account: Address) -> usize {
        match book.iter().position(|(a, _, _)| *a == account) {
            Some(i) => i,
            None => {
                book.push((account, 0, 0));
                book.len() - 1
            }
        }
    }

    // (account, paid in, paid out), in first-touch order
    let mut book: Vec<(Address, Amount, Amount)> = Vec::new();
    for mv in flows {
        let from = slot(&mut book, mv.from);
        book[from].2 = book[from].2.checked_add(mv.amount).ok_or(AssetError::Overflow)?;
        let to = slot(&mut book, mv.to);
        book[to].1 = book[to].1.checked_add(mv.amount).ok_or(AssetError::Overflow)?;
    }

    let payers: Vec<(Address, Amount)> = book
        .iter()
        .filter(|(_, inflow, outflow)| outflow > inflow)
        .map(|(a, inflow, outflow)| (*a, outflow - inflow))
        .collect();
    let payees: Vec<(Address, Amount)> = book
        .iter()
        .filter(|(_, inflow, outflow)| inflow > outflow)
        .map(|(a, inflow, outflow)| (*a, inflow - outflow))
        .collect();

    let moves = match (payers.as_slice(), payees.as_slice()) {
        ([], []) => Vec::new(),
        ([(payer, _)], [(payee, amount)]) => vec![AssetMove::new(*payer, *payee, *amount)],
        ([(payer, _)], _) if payer == caller => payees
            .iter()
            .map(|(payee, amount)| AssetMove::new(*payer, *payee, *amount))
            .collect(),
        (_, [(payee, _)]) if payee == caller => payers
            .iter()
            .map(|(payer, amount)| AssetMove::new(*payer, *payee, *amount))
            .collect(),
        _ => payers
            .iter()
            .map(|(payer, amount)| AssetMove::new(*payer, *escrow, *amount))
            .chain(
                payees
                    .iter()
                    .map(|(payee, amount)| AssetMove::new(*escrow, *payee, *amount)),
            )
            .collect(),
    };
    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESCROW: Address = [0xee; 32];
    const CALLER: Address = [0xca; 32];

    fn a(n: u8) -> Address {
        [n; 32]
    }

    #[test]
    fn shape_checks_run_in_order() {
        assert_eq!(
            validate_shape(&[], &[a(1)], &[]),
            Err(DelegationError::ArityMismatch { expected: 1, actual: 0 })
        );
        assert_eq!(validate_shape(&[], &[], &[]), Err(DelegationError::EmptyBatch));
        assert_eq!(
            validate_shape(&[], &[a(1), a(2)], &[3, 0]),
            Err(DelegationError::ZeroAmount(a(2)))
        );
        assert_eq!(
            validate_shape(&[a(1), a(1)], &[], &[]),
            Err(DelegationError::DuplicateDelegate {
                side: Side::Source,
                delegate: a(1),
            })
        );
        assert_eq!(
            validate_shape(&[a(1)], &[a(1), a(2), a(1)], &[1, 2, 3]),
            Err(DelegationError::DuplicateDelegate {
                side: Side::Target,
                delegate: a(1),
            })
        );
        assert!(validate_shape(&[a(1)], &[a(1)], &[5]).is_ok());
    }

    #[test]
    fn netting_cancels_pass_through_accounts() {
        // caller -> p1 -> p2 collapses into caller -> p2
        let flows = [AssetMove::new(CALLER, a(1), 5), AssetMove::new(a(1), a(2), 5)];
        assert_eq!(
            net_moves(&flows, &CALLER, &ESCROW).unwrap(),
            vec![AssetMove::new(CALLER, a(2), 5)]
        );
    }

    #[test]
    fn netting_lets_the_caller_pay_directly() {
        let flows = [AssetMove::new(CALLER, a(2), 4), AssetMove::new(CALLER, a(3), 6)];
        assert_eq!(
            net_moves(&flows, &CALLER, &ESCROW).unwrap(),
            vec![AssetMove::new(CALLER, a(2), 4), AssetMove::new(CALLER, a(3), 6)]
        );
    }

    #[test]
    fn netting_single_proxy_payer_fans_out_through_escrow() {
        let flows = [
            AssetMove::new(a(1), a(2), 4),
            AssetMove::new(a(1), a(3), 6),
            AssetMove::new(a(1), CALLER, 1),
        ];
        assert_eq!(
            net_moves(&flows, &CALLER, &ESCROW).unwrap(),
            vec![
                AssetMove::new(a(1), ESCROW, 11),
                AssetMove::new(ESCROW, a(2), 4),
                AssetMove::new(ESCROW, a(3), 6),
                AssetMove::new(ESCROW, CALLER, 1),
            ]
        );
    }

    #[test]
    fn netting_many_to_many_routes_through_escrow() {
        let flows = [
            AssetMove::new(a(1), a(3), 7),
            AssetMove::new(a(1), a(4), 3),
            AssetMove::new(a(2), a(4), 5),
        ];
        let moves = net_moves(&flows, &CALLER, &ESCROW).unwrap();
        assert_eq!(
            moves,
            vec![
                AssetMove::new(a(1), ESCROW, 10),
                AssetMove::new(a(2), ESCROW, 5),
                AssetMove::new(ESCROW, a(3), 7),
                AssetMove::new(ESCROW, a(4), 8),
            ]
        );
    }

    #[test]
    fn netting_drops_self_moves() {
        let flows = [AssetMove::new(a(1), a(1), 4)];
        assert!(net_moves(&flows, &CALLER, &ESCROW).unwrap().is_empty());
    }
}
