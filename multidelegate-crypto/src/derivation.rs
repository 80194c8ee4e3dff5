//! Deterministic account derivation.
//!
//! Proxy addresses depend only on `(asset, delegate)`, so anyone can compute where a
//! delegate's proxy lives before it has ever been provisioned.

use blake3::Hasher;
use multidelegate_types::{Address, AssetId, DelegateId};

const PROXY_DOMAIN: &[u8] = b"multidelegate/proxy/v1";
const PROCESSOR_DOMAIN: &[u8] = b"multidelegate/processor/v1";

pub fn proxy_address(asset: &AssetId, delegate: &DelegateId) -> Address {
    let mut hasher = Hasher::new();
    hasher.update(PROXY_DOMAIN);
    hasher.update(asset);
    hasher.update(delegate);
    *hasher.finalize().as_bytes()
}

/// Account the processor spends from. Proxies grant it an allowance when they are
/// provisioned, and netted settlement routes through it as escrow.
pub fn processor_address(asset: &AssetId) -> Address {
    let mut hasher = Hasher::new();
    hasher.update(PROCESSOR_DOMAIN);
    hasher.update(asset);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_address_is_pure() {
        let asset = [1u8; 32];
        let delegate = [2u8; 32];
        assert_eq!(proxy_address(&asset, &delegate), proxy_address(&asset, &delegate));
    }

    #[test]
    fn proxy_address_separates_assets_and_delegates() {
        let a = proxy_address(&[1u8; 32], &[2u8; 32]);
        assert_ne!(a, proxy_address(&[3u8; 32], &[2u8; 32]));
        assert_ne!(a, proxy_address(&[1u8; 32], &[3u8; 32]));
    }

    #[test]
    fn processor_never_equals_a_proxy_of_the_same_asset() {
        let asset = [5u8; 32];
        assert_ne!(processor_address(&asset), proxy_address(&asset, &asset));
    }
}
