use crate::primitives::{AssetId, DelegateId};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AccountState {
    pub nonce: u64,
}

/// How a plan is settled against the underlying asset. Both modes leave identical
/// ledger and balance state behind.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// One asset movement per transfer instruction.
    #[default]
    Sequential,
    /// Net deltas per account, at most one movement per proxy touched.
    Netted,
}

impl std::str::FromStr for SettlementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(SettlementMode::Sequential),
            "netted" => Ok(SettlementMode::Netted),
            other => Err(format!("unknown settlement mode: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub asset: AssetId,
    /// Metadata URI template; `{id}` is replaced with the delegate id in hex.
    #[serde(default)]
    pub uri_template: Option<String>,
    #[serde(default)]
    pub settlement: SettlementMode,
}

impl ProcessorConfig {
    pub fn new(asset: AssetId) -> Self {
        Self {
            asset,
            uri_template: None,
            settlement: SettlementMode::default(),
        }
    }

    pub fn uri(&self, delegate: &DelegateId) -> Option<String> {
        self.uri_template
            .as_ref()
            .map(|t| t.replace("{id}", &hex::encode(delegate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_substitutes_full_hex_id() {
        let mut cfg = ProcessorConfig::new([9u8; 32]);
        assert_eq!(cfg.uri(&[1u8; 32]), None);

        cfg.uri_template = Some("http://localhost:8080/{id}".into());
        let uri = cfg.uri(&[0xabu8; 32]).unwrap();
        assert_eq!(uri, format!("http://localhost:8080/{}", "ab".repeat(32)));
    }

    #[test]
    fn settlement_mode_parses_case_insensitively() {
        assert_eq!("Netted".parse::<SettlementMode>(), Ok(SettlementMode::Netted));
        assert_eq!("sequential".parse::<SettlementMode>(), Ok(SettlementMode::Sequential));
        assert!("batched".parse::<SettlementMode>().is_err());
    }
}
