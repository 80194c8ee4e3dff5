use crate::asset::{TokenLedger, VotableAsset};
use crate::ledger::DelegationLedger;
use crate::processor::{BatchProcessor, DelegationReceipt};
use crate::registry::ProxyRegistry;
use multidelegate_types::{
    AccountState, Address, Amount, DelegateId, DelegationError, ProcessorConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GlobalState {
    pub config: ProcessorConfig,
    pub accounts: BTreeMap<Address, AccountState>,
    pub registry: ProxyRegistry,
    pub ledger: DelegationLedger,
    pub token: TokenLedger,
}

impl GlobalState {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            registry: ProxyRegistry::new(config.asset),
            config,
            accounts: BTreeMap::new(),
            ledger: DelegationLedger::default(),
            token: TokenLedger::default(),
        }
    }

    pub fn processor(&mut self) -> BatchProcessor<'_, TokenLedger> {
        BatchProcessor::new(
            &mut self.registry,
            &mut self.ledger,
            &mut self.token,
            self.config.settlement,
        )
    }

    pub fn delegate_multi(
        &mut self,
        caller: &Address,
        sources: &[DelegateId],
        targets: &[DelegateId],
        amounts: &[Amount],
    ) -> Result<DelegationReceipt, DelegationError> {
        self.processor().delegate_multi(caller, sources, targets, amounts)
    }

    pub fn proxy_address(&self, delegate: &DelegateId) -> Address {
        self.registry.address_of(delegate)
    }

    pub fn get_balance_for_delegate(&self, delegate: &DelegateId) -> Amount {
        self.ledger.total_for(delegate)
    }

    pub fn balance_of(&self, depositor: &Address, delegate: &DelegateId) -> Amount {
        self.ledger.balance_of(depositor, delegate)
    }

    pub fn balance_of_batch(
        &self,
        depositors: &[Address],
        delegates: &[DelegateId],
    ) -> Result<Vec<Amount>, DelegationError> {
        self.ledger.balance_of_batch(depositors, delegates)
    }

    pub fn uri(&self, delegate: &DelegateId) -> Option<String> {
        self.config.uri(delegate)
    }

    pub fn nonce_of(&self, account: &Address) -> u64 {
        self.accounts.get(account).map_or(0, |a| a.nonce)
    }

    pub fn root_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&bincode::serialize(self).expect("state serialization"));
        *hasher.finalize().as_bytes()
    }

    pub fn audit(&self) -> Result<(), InvariantViolation> {
        audit(&self.registry, &self.ledger, &self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("ledger total for {} is {recorded} but entries sum to {summed}", hex::encode(.delegate))]
    TotalMismatch {
        delegate: DelegateId,
        recorded: Amount,
        summed: Amount,
    },
    #[error("ledger holds {ledger} for {} but its proxy custodies {custodied}", hex::encode(.delegate))]
    CustodyMismatch {
        delegate: DelegateId,
        ledger: Amount,
        custodied: Amount,
    },
    #[error("proxy of {} does not delegate to it", hex::encode(.0))]
    ProxyNotDelegating(DelegateId),
    #[error("{} has {votes} votes but its proxy custodies {custodied}", hex::encode(.delegate))]
    VotesBelowCustody {
        delegate: DelegateId,
        votes: Amount,
        custodied: Amount,
    },
    #[error("ledger balance on {} without a proxy", hex::encode(.0))]
    MissingProxy(DelegateId),
    #[error("processor escrow holds {0}")]
    EscrowNotEmpty(Amount),
}

/// Checks the ledger against itself and against what the asset says each proxy holds.
pub fn audit<A: VotableAsset>(
    registry: &ProxyRegistry,
    ledger: &DelegationLedger,
    asset: &A,
) -> Result<(), InvariantViolation> {
    let mut summed: BTreeMap<DelegateId, Amount> = BTreeMap::new();
    for ((_, delegate), amount) in ledger.entries() {
        let s = summed.entry(*delegate).or_default();
        *s = s.saturating_add(*amount);
    }
    for (delegate, recorded) in ledger.totals() {
        let s = summed.get(delegate).copied().unwrap_or(0);
        if s != *recorded {
            return Err(InvariantViolation::TotalMismatch {
                delegate: *delegate,
                recorded: *recorded,
                summed: s,
            });
        }
        if !registry.is_provisioned(delegate) {
            return Err(InvariantViolation::MissingProxy(*delegate));
        }
    }
    if let Some((delegate, s)) = summed.iter().find(|(d, _)| ledger.total_for(d) == 0) {
        return Err(InvariantViolation::TotalMismatch {
            delegate: *delegate,
            recorded: 0,
            summed: *s,
        });
    }

    for handle in registry.iter() {
        let recorded = ledger.total_for(&handle.delegate);
        let custodied = asset.balance_of(&handle.address);
        if recorded != custodied {
            return Err(InvariantViolation::CustodyMismatch {
                delegate: handle.delegate,
                ledger: recorded,
                custodied,
            });
        }
        if asset.delegates(&handle.address) != Some(handle.delegate) {
            return Err(InvariantViolation::ProxyNotDelegating(handle.delegate));
        }
        let votes = asset.get_votes(&handle.delegate);
        if votes < custodied {
            return Err(InvariantViolation::VotesBelowCustody {
                delegate: handle.delegate,
                votes,
                custodied,
            });
        }
    }

    let escrow = asset.balance_of(registry.processor());
    if escrow != 0 {
        return Err(InvariantViolation::EscrowNotEmpty(escrow));
    }
    Ok(())
}
