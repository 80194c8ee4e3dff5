use multidelegate_crypto::derivation::{processor_address, proxy_address};
use multidelegate_types::primitives::short;
use multidelegate_types::{Address, AssetId, DelegateId, DelegationError, ZERO_ADDRESS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// A provisioned (or about to be provisioned) custodial account for one delegate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHandle {
    pub delegate: DelegateId,
    pub address: Address,
}

/// One custodial proxy per delegate, at an address derived from `(asset, delegate)`.
///
/// Proxies are recorded lazily and never removed; a proxy whose balance drops to
/// zero keeps its address and is reused by later deposits.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProxyRegistry {
    asset: AssetId,
    processor: Address,
    proxies: BTreeMap<DelegateId, Address>,
    owners: BTreeMap<Address, DelegateId>,
}

impl ProxyRegistry {
    pub fn new(asset: AssetId) -> Self {
        Self {
            asset,
            processor: processor_address(&asset),
            proxies: BTreeMap::new(),
            owners: BTreeMap::new(),
        }
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    /// The account that spends on behalf of proxies and holds netted transfers in escrow.
    pub fn processor(&self) -> &Address {
        &self.processor
    }

    /// Where the proxy for `delegate` lives, whether or not it exists yet.
    pub fn address_of(&self, delegate: &DelegateId) -> Address {
        proxy_address(&self.asset, delegate)
    }

    pub fn get(&self, delegate: &DelegateId) -> Option<ProxyHandle> {
        self.proxies.get(delegate).map(|address| ProxyHandle {
            delegate: *delegate,
            address: *address,
        })
    }

    pub fn is_provisioned(&self, delegate: &DelegateId) -> bool {
        self.proxies.contains_key(delegate)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProxyHandle> + '_ {
        self.proxies.iter().map(|(delegate, address)| ProxyHandle {
            delegate: *delegate,
            address: *address,
        })
    }

    /// Returns the handle `ensure` would produce, without recording anything.
    pub fn resolve(&self, delegate: &DelegateId) -> Result<ProxyHandle, DelegationError> {
        self.resolve_pending(delegate, &[])
    }

    /// Like [`resolve`](Self::resolve), but also refuses an address already taken by
    /// one of `pending`, the handles resolved earlier in the same call.
    pub fn resolve_pending(
        &self,
        delegate: &DelegateId,
        pending: &[ProxyHandle],
    ) -> Result<ProxyHandle, DelegationError> {
        if let Some(handle) = self.get(delegate) {
            return Ok(handle);
        }
        self.claim(delegate, self.address_of(delegate), pending)
    }

    fn claim(
        &self,
        delegate: &DelegateId,
        address: Address,
        pending: &[ProxyHandle],
    ) -> Result<ProxyHandle, DelegationError> {
        let reserved = if address == ZERO_ADDRESS {
            Some("derived the zero address")
        } else if address == self.asset {
            Some("derived the asset address")
        } else if address == self.processor {
            Some("derived the processor address")
        } else if self.owners.contains_key(&address) {
            Some("address already owned by another delegate")
        } else if pending
            .iter()
            .any(|h| h.address == address && h.delegate != *delegate)
        {
            Some("address claimed by another delegate in the same call")
        } else {
            None
        };
        if let Some(reason) = reserved {
            return Err(DelegationError::ProxyProvisioningFailed {
                delegate: *delegate,
                reason: reason.to_string(),
            });
        }

        Ok(ProxyHandle {
            delegate: *delegate,
            address,
        })
    }

    /// Idempotent: the first call records the proxy, later calls return the same
    /// handle without side effects.
    pub fn ensure(&mut self, delegate: &DelegateId) -> Result<ProxyHandle, DelegationError> {
        let handle = self.resolve(delegate)?;
        self.insert(handle);
        Ok(handle)
    }

    /// Records a handle obtained from [`resolve`](Self::resolve). Returns `false` if
    /// the delegate already had a proxy.
    pub(crate) fn insert(&mut self, handle: ProxyHandle) -> bool {
        if self.proxies.contains_key(&handle.delegate) {
            return false;
        }
        info!(
            delegate = %short(&handle.delegate),
            proxy = %short(&handle.address),
            "Provisioned delegate proxy"
        );
        self.proxies.insert(handle.delegate, handle.address);
        self.owners.insert(handle.address, handle.delegate);
        true
    }

    #[cfg(test)]
    pub(crate) fn with_processor(asset: AssetId, processor: Address) -> Self {
        Self {
            processor,
            ..Self::new(asset)
        }
    }
}
