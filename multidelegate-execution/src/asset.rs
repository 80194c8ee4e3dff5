//! The votable asset that proxies custody.
//!
//! The processor only talks to the asset through [`VotableAsset`]. [`TokenLedger`] is
//! the in-process implementation: plain balances and allowances plus per-delegatee
//! vote tallies that follow every transfer.

use multidelegate_types::{Address, Amount, AssetError, DelegateId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMove {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

impl AssetMove {
    pub fn new(from: Address, to: Address, amount: Amount) -> Self {
        Self { from, to, amount }
    }
}

/// Everything one call does to the asset, applied as a unit.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AssetBatch {
    /// `(proxy, delegate)` pairs for proxies created by this call. Each proxy delegates
    /// its votes to the delegate and grants the spender an unlimited allowance before
    /// any move runs.
    pub provisions: Vec<(Address, DelegateId)>,
    pub moves: Vec<AssetMove>,
}

pub trait VotableAsset {
    fn balance_of(&self, account: &Address) -> Amount;

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount;

    /// `Amount::MAX` is an unlimited allowance and is never decremented.
    fn approve(&mut self, owner: Address, spender: Address, amount: Amount);

    /// Moves `amount` from `from` to `to` on behalf of `spender`. Spending from one's own
    /// account needs no allowance.
    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError>;

    fn delegate(&mut self, account: Address, delegatee: DelegateId);

    fn delegates(&self, account: &Address) -> Option<DelegateId>;

    fn get_votes(&self, delegatee: &DelegateId) -> Amount;

    /// Applies every provision and move of `batch`, or none of them.
    fn execute_batch(&mut self, spender: &Address, batch: &AssetBatch) -> Result<(), AssetError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TokenLedger {
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<(Address, Address), Amount>,
    delegations: BTreeMap<Address, DelegateId>,
    votes: BTreeMap<DelegateId, Amount>,
    total_supply: Amount,
}

impl TokenLedger {
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn mint(&mut self, to: Address, amount: Amount) -> Result<(), AssetError> {
        let supply = self.total_supply.checked_add(amount).ok_or(AssetError::Overflow)?;
        let balance = self.balance_of(&to).checked_add(amount).ok_or(AssetError::Overflow)?;
        self.total_supply = supply;
        self.balances.insert(to, balance);
        if let Some(delegatee) = self.delegations.get(&to).copied() {
            self.add_votes(&delegatee, amount);
        }
        Ok(())
    }

    fn add_votes(&mut self, delegatee: &DelegateId, amount: Amount) {
        // votes never exceed total supply, which is overflow-checked on mint
        let v = self.votes.entry(*delegatee).or_default();
        *v = v.saturating_add(amount);
    }

    fn sub_votes(&mut self, delegatee: &DelegateId, amount: Amount) {
        if let Some(v) = self.votes.get_mut(delegatee) {
            *v = v.saturating_sub(amount);
            if *v == 0 {
                self.votes.remove(delegatee);
            }
        }
    }

    fn set_balance(&mut self, account: Address, amount: Amount) {
        if amount == 0 {
            self.balances.remove(&account);
        } else {
            self.balances.insert(account, amount);
        }
    }

    /// Dry-runs the moves of a batch against current balances and allowances.
    fn check_batch(&self, spender: &Address, batch: &AssetBatch) -> Result<(), AssetError> {
        let provisioned: BTreeSet<&Address> = batch.provisions.iter().map(|(proxy, _)| proxy).collect();
        let mut balances: BTreeMap<Address, Amount> = BTreeMap::new();
        let mut allowances: BTreeMap<Address, Amount> = BTreeMap::new();

        for mv in &batch.moves {
            if mv.from != *spender && !provisioned.contains(&mv.from) {
                let allowance = allowances
                    .entry(mv.from)
                    .or_insert_with(|| self.allowance(&mv.from, spender));
                if *allowance != Amount::MAX {
                    if *allowance < mv.amount {
                        return Err(AssetError::InsufficientAllowance {
                            owner: mv.from,
                            available: *allowance,
                            required: mv.amount,
                        });
                    }
                    *allowance -= mv.amount;
                }
            }

            let from_balance = balances.entry(mv.from).or_insert_with(|| self.balance_of(&mv.from));
            if *from_balance < mv.amount {
                return Err(AssetError::InsufficientBalance {
                    account: mv.from,
                    available: *from_balance,
                    required: mv.amount,
                });
            }
            *from_balance -= mv.amount;

            let to_balance = balances.entry(mv.to).or_insert_with(|| self.balance_of(&mv.to));
            *to_balance = to_balance.checked_add(mv.amount).ok_or(AssetError::Overflow)?;
        }
        Ok(())
    }
}

impl VotableAsset for TokenLedger {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.allowances.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    fn approve(&mut self, owner: Address, spender: Address, amount: Amount) {
        if amount == 0 {
            self.allowances.remove(&(owner, spender));
        } else {
            self.allowances.insert((owner, spender), amount);
        }
    }

    fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let allowance = self.allowance(from, spender);
        let spends_allowance = from != spender && allowance != Amount::MAX;
        if from != spender && allowance < amount {
            return Err(AssetError::InsufficientAllowance {
                owner: *from,
                available: allowance,
                required: amount,
            });
        }

        let from_balance = self.balance_of(from);
        if from_balance < amount {
            return Err(AssetError::InsufficientBalance {
                account: *from,
                available: from_balance,
                required: amount,
            });
        }
        if from == to {
            if spends_allowance {
                self.approve(*from, *spender, allowance - amount);
            }
            return Ok(());
        }
        let to_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(AssetError::Overflow)?;

        if spends_allowance {
            self.approve(*from, *spender, allowance - amount);
        }
        self.set_balance(*from, from_balance - amount);
        self.set_balance(*to, to_balance);

        if let Some(delegatee) = self.delegations.get(from).copied() {
            self.sub_votes(&delegatee, amount);
        }
        if let Some(delegatee) = self.delegations.get(to).copied() {
            self.add_votes(&delegatee, amount);
        }
        Ok(())
    }

    fn delegate(&mut self, account: Address, delegatee: DelegateId) {
        let balance = self.balance_of(&account);
        if let Some(previous) = self.delegations.insert(account, delegatee) {
            self.sub_votes(&previous, balance);
        }
        self.add_votes(&delegatee, balance);
    }

    fn delegates(&self, account: &Address) -> Option<DelegateId> {
        self.delegations.get(account).copied()
    }

    fn get_votes(&self, delegatee: &DelegateId) -> Amount {
        self.votes.get(delegatee).copied().unwrap_or(0)
    }

    fn execute_batch(&mut self, spender: &Address, batch: &AssetBatch) -> Result<(), AssetError> {
        self.check_batch(spender, batch)?;

        for (proxy, delegate) in &batch.provisions {
            self.delegate(*proxy, *delegate);
            self.approve(*proxy, *spender, Amount::MAX);
        }
        for mv in &batch.moves {
            self.transfer_from(spender, &mv.from, &mv.to, mv.amount)?;
        }
        Ok(())
    }
}
