//! Sparse `(depositor, delegate) -> amount` ledger.
//!
//! Zero entries are removed, so absence and zero are the same thing. Per-delegate
//! totals are kept alongside the entries and must always equal their sum.

use multidelegate_types::{Address, Amount, DelegateId, DelegationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MAX_DELEGATE: DelegateId = [u8::MAX; 32];
const MIN_DELEGATE: DelegateId = [0u8; 32];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DelegationLedger {
    entries: BTreeMap<(Address, DelegateId), Amount>,
    totals: BTreeMap<DelegateId, Amount>,
}

impl DelegationLedger {
    pub fn balance_of(&self, depositor: &Address, delegate: &DelegateId) -> Amount {
        self.entries.get(&(*depositor, *delegate)).copied().unwrap_or(0)
    }

    /// Pairwise lookup of `depositors[i]` on `delegates[i]`.
    pub fn balance_of_batch(
        &self,
        depositors: &[Address],
        delegates: &[DelegateId],
    ) -> Result<Vec<Amount>, DelegationError> {
        if depositors.len() != delegates.len() {
            return Err(DelegationError::ArityMismatch {
                expected: depositors.len(),
                actual: delegates.len(),
            });
        }
        Ok(depositors
            .iter()
            .zip(delegates)
            .map(|(depositor, delegate)| self.balance_of(depositor, delegate))
            .collect())
    }

    pub fn total_for(&self, delegate: &DelegateId) -> Amount {
        self.totals.get(delegate).copied().unwrap_or(0)
    }

    /// Non-zero positions of one depositor, ordered by delegate.
    pub fn entries_of(&self, depositor: &Address) -> impl Iterator<Item = (DelegateId, Amount)> + '_ {
        self.entries
            .range((*depositor, MIN_DELEGATE)..=(*depositor, MAX_DELEGATE))
            .map(|((_, delegate), amount)| (*delegate, *amount))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&(Address, DelegateId), &Amount)> + '_ {
        self.entries.iter()
    }

    pub fn totals(&self) -> impl Iterator<Item = (&DelegateId, &Amount)> + '_ {
        self.totals.iter()
    }

    pub fn credit(&mut self, depositor: Address, delegate: DelegateId, amount: Amount) -> Result<(), DelegationError> {
        let mut stage = self.stage(depositor);
        stage.credit(&delegate, amount)?;
        let writes = stage.finish();
        self.apply(writes);
        Ok(())
    }

    pub fn debit(&mut self, depositor: Address, delegate: DelegateId, amount: Amount) -> Result<(), DelegationError> {
        let mut stage = self.stage(depositor);
        stage.debit(&delegate, amount)?;
        let writes = stage.finish();
        self.apply(writes);
        Ok(())
    }

    /// Opens a staging area for one depositor's mutations. Nothing is visible in the
    /// ledger until the finished stage is applied.
    pub fn stage(&self, depositor: Address) -> LedgerStage<'_> {
        LedgerStage {
            ledger: self,
            depositor,
            entries: BTreeMap::new(),
            totals: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, writes: LedgerWrites) {
        for (delegate, amount) in writes.entries {
            if amount == 0 {
                self.entries.remove(&(writes.depositor, delegate));
            } else {
                self.entries.insert((writes.depositor, delegate), amount);
            }
        }
        for (delegate, total) in writes.totals {
            if total == 0 {
                self.totals.remove(&delegate);
            } else {
                self.totals.insert(delegate, total);
            }
        }
    }
}

/// Pending debits and credits of a single depositor, checked against the ledger as
/// they are recorded.
#[derive(Debug)]
pub struct LedgerStage<'a> {
    ledger: &'a DelegationLedger,
    depositor: Address,
    entries: BTreeMap<DelegateId, Amount>,
    totals: BTreeMap<DelegateId, Amount>,
}

impl LedgerStage<'_> {
    pub fn balance_of(&self, delegate: &DelegateId) -> Amount {
        self.entries
            .get(delegate)
            .copied()
            .unwrap_or_else(|| self.ledger.balance_of(&self.depositor, delegate))
    }

    fn total_for(&self, delegate: &DelegateId) -> Amount {
        self.totals
            .get(delegate)
            .copied()
            .unwrap_or_else(|| self.ledger.total_for(delegate))
    }

    pub fn credit(&mut self, delegate: &DelegateId, amount: Amount) -> Result<(), DelegationError> {
        let entry = self
            .balance_of(delegate)
            .checked_add(amount)
            .ok_or(DelegationError::Overflow)?;
        let total = self
            .total_for(delegate)
            .checked_add(amount)
            .ok_or(DelegationError::Overflow)?;
        self.entries.insert(*delegate, entry);
        self.totals.insert(*delegate, total);
        Ok(())
    }

    pub fn debit(&mut self, delegate: &DelegateId, amount: Amount) -> Result<(), DelegationError> {
        let available = self.balance_of(delegate);
        if amount > available {
            return Err(DelegationError::InsufficientBalance {
                delegate: *delegate,
                available,
                requested: amount,
            });
        }
        // total >= entry always holds, so this only trips on a corrupted ledger
        let total = self
            .total_for(delegate)
            .checked_sub(amount)
            .ok_or(DelegationError::Overflow)?;
        self.entries.insert(*delegate, available - amount);
        self.totals.insert(*delegate, total);
        Ok(())
    }

    pub fn finish(self) -> LedgerWrites {
        LedgerWrites {
            depositor: self.depositor,
            entries: self.entries,
            totals: self.totals,
        }
    }
}

/// Final values produced by a [`LedgerStage`]; applying them cannot fail.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerWrites {
    depositor: Address,
    entries: BTreeMap<DelegateId, Amount>,
    totals: BTreeMap<DelegateId, Amount>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = [0xa1; 32];
    const BOB: Address = [0xb0; 32];
    const D1: DelegateId = [1u8; 32];
    const D2: DelegateId = [2u8; 32];

    #[test]
    fn absent_entries_read_as_zero() {
        let ledger = DelegationLedger::default();
        assert_eq!(ledger.balance_of(&ALICE, &D1), 0);
        assert_eq!(ledger.total_for(&D1), 0);
    }

    #[test]
    fn credit_and_debit_track_totals() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, 10).unwrap();
        ledger.credit(BOB, D1, 5).unwrap();
        assert_eq!(ledger.total_for(&D1), 15);

        ledger.debit(ALICE, D1, 4).unwrap();
        assert_eq!(ledger.balance_of(&ALICE, &D1), 6);
        assert_eq!(ledger.total_for(&D1), 11);
    }

    #[test]
    fn full_withdrawal_removes_entry() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, 10).unwrap();
        ledger.debit(ALICE, D1, 10).unwrap();
        assert_eq!(ledger.entries().count(), 0);
        assert_eq!(ledger.totals().count(), 0);
    }

    #[test]
    fn overdraw_is_rejected_without_mutation() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, 3).unwrap();
        let before = ledger.clone();

        let err = ledger.debit(ALICE, D1, 4).unwrap_err();
        assert_eq!(
            err,
            DelegationError::InsufficientBalance {
                delegate: D1,
                available: 3,
                requested: 4,
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn credit_overflow_is_fatal() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, Amount::MAX).unwrap();
        let err = ledger.credit(BOB, D1, 1).unwrap_err();
        assert_eq!(err, DelegationError::Overflow);
        assert!(err.is_fatal());
        assert_eq!(ledger.balance_of(&BOB, &D1), 0);
    }

    #[test]
    fn stage_is_invisible_until_applied() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, 10).unwrap();

        let mut stage = ledger.stage(ALICE);
        stage.debit(&D1, 10).unwrap();
        stage.credit(&D2, 6).unwrap();
        assert_eq!(stage.balance_of(&D1), 0);
        assert_eq!(ledger.balance_of(&ALICE, &D1), 10);

        let writes = stage.finish();
        ledger.apply(writes);
        assert_eq!(ledger.balance_of(&ALICE, &D1), 0);
        assert_eq!(ledger.balance_of(&ALICE, &D2), 6);
        assert_eq!(ledger.total_for(&D2), 6);
    }

    #[test]
    fn entries_of_is_scoped_to_depositor() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D2, 2).unwrap();
        ledger.credit(ALICE, D1, 1).unwrap();
        ledger.credit(BOB, D1, 9).unwrap();

        let alice: Vec<_> = ledger.entries_of(&ALICE).collect();
        assert_eq!(alice, vec![(D1, 1), (D2, 2)]);
    }

    #[test]
    fn balance_of_batch_checks_arity() {
        let mut ledger = DelegationLedger::default();
        ledger.credit(ALICE, D1, 7).unwrap();
        assert_eq!(
            ledger.balance_of_batch(&[ALICE, BOB], &[D1, D1]).unwrap(),
            vec![7, 0]
        );
        assert!(matches!(
            ledger.balance_of_batch(&[ALICE], &[D1, D2]),
            Err(DelegationError::ArityMismatch { expected: 1, actual: 2 })
        ));
    }
}
