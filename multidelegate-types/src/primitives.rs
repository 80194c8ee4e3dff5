/// 32-byte account identifier. Depositors, proxies, delegates and the asset itself
/// all live in the same address space.
pub type Address = [u8; 32];

/// A delegate is addressed by the account its voting weight is delegated to.
pub type DelegateId = Address;

/// Identifier of the underlying votable asset.
pub type AssetId = Address;

pub type Amount = u128;

pub const ZERO_ADDRESS: Address = [0u8; 32];

/// First four bytes as hex, for log fields.
pub fn short(addr: &Address) -> String {
    hex::encode(&addr[..4])
}

/// Parses a 64-char hex address, with or without a `0x` prefix.
pub fn parse_address(s: &str) -> Result<Address, hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
    Ok(out)
}
