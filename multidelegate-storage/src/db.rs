use anyhow::{anyhow, Context, Result};
use multidelegate_execution::{CallReceipt, GlobalState};
use multidelegate_types::Address;
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const STATE_KEY: &[u8] = b"global_state";
const RECEIPT_PREFIX: &str = "receipt_";

/// Snapshot and receipt store backed by RocksDB.
///
/// RocksDB holds an exclusive lock on the data directory for as long as the handle
/// lives, so a second process cannot open the same store until this one is dropped.
/// Receipts are keyed by sender and zero-padded nonce so a prefix scan returns one
/// sender's history in order.
pub struct Storage {
    db: DB,
}

impl Storage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)
            .map_err(|e| anyhow!("Failed to open DB at {}: {}", path.display(), e))?;
        Ok(Self { db })
    }

    pub fn save_state(&self, state: &GlobalState) -> Result<()> {
        self.commit(state, None)
    }

    /// `None` when nothing has been saved yet.
    pub fn load_state(&self) -> Result<Option<GlobalState>> {
        self.get(STATE_KEY)
    }

    /// Writes the state snapshot and, if given, the receipt of the call that produced
    /// it in one atomic batch.
    pub fn commit(&self, state: &GlobalState, receipt: Option<&CallReceipt>) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(STATE_KEY, encode(state)?);
        if let Some(receipt) = receipt {
            batch.put(receipt_key(&receipt.sender, receipt.nonce), encode(receipt)?);
        }
        self.db
            .write(batch)
            .map_err(|e| anyhow!("DB write error: {}", e))?;

        debug!(
            root = %hex::encode(state.root_hash()),
            call = ?receipt.map(|r| hex::encode(r.call_id)),
            "State committed"
        );
        Ok(())
    }

    pub fn save_receipt(&self, receipt: &CallReceipt) -> Result<()> {
        self.db
            .put(receipt_key(&receipt.sender, receipt.nonce), encode(receipt)?)
            .map_err(|e| anyhow!("DB write error: {}", e))?;
        debug!(call = %hex::encode(receipt.call_id), nonce = receipt.nonce, "Receipt saved");
        Ok(())
    }

    pub fn load_receipt(&self, sender: &Address, nonce: u64) -> Result<Option<CallReceipt>> {
        self.get(receipt_key(sender, nonce).as_bytes())
    }

    /// Every stored receipt of `sender`, oldest first.
    pub fn receipts_of(&self, sender: &Address) -> Result<Vec<CallReceipt>> {
        let prefix = format!("{RECEIPT_PREFIX}{}_", hex::encode(sender));
        let mut receipts = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) = item.map_err(|e| anyhow!("DB iteration error: {}", e))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            receipts.push(bincode::deserialize(&value).with_context(|| {
                format!("Deserialization error for {}", String::from_utf8_lossy(&key))
            })?);
        }
        Ok(receipts)
    }

    fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key).map_err(|e| anyhow!("DB read error: {}", e))? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).context("Deserialization error")?,
            )),
            None => Ok(None),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context("Serialization error")
}

fn receipt_key(sender: &Address, nonce: u64) -> String {
    format!("{RECEIPT_PREFIX}{}_{nonce:020}", hex::encode(sender))
}
