//! Serializing and committing one batch of index deltas.
//!
//! Order matters for crash safety: output records first, history records
//! second, hints third, and the top-scanned sentinel strictly last. A crash
//! anywhere before the sentinel leaves the previous sentinel in place, so
//! the next startup re-scans the batch; records are keyed canonically, so
//! the re-commit is byte-identical.

use std::collections::BTreeMap;

use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::batch::AccumulatedBatch;
use crate::keys::IndexKey;
use crate::sdbi::{get_sdbi, put_sdbi, StoredDbInfo};
use crate::subssh::{encode_sub_history, history_key, SubHistory, HISTORY_KEY_LEN};
use crate::txhints::{hint_prefix, HintMap, TxHints};
use crate::DbType;

pub struct IndexCommitter<'a, S> {
    store: &'a S,
    db_type: DbType,
    magic: [u8; 4],
}

impl<'a, S: KeyValueStore> IndexCommitter<'a, S> {
    pub fn new(store: &'a S, db_type: DbType, magic: [u8; 4]) -> Self {
        Self {
            store,
            db_type,
            magic,
        }
    }

    pub fn commit_batch(&self, batch: &AccumulatedBatch) -> Result<(), StoreError> {
        // serialize outputs; spent variants overwrite unspent ones produced
        // in the same batch at the same key
        let mut serialized_stxo: BTreeMap<IndexKey, Vec<u8>> = BTreeMap::new();
        for shard in &batch.shards {
            for outputs in shard.utxos.values() {
                for stxo in outputs.values() {
                    serialized_stxo.insert(stxo.key, stxo.encode());
                }
            }
        }
        for shard in &batch.shards {
            for stxo in &shard.spent {
                serialized_stxo.insert(stxo.key, stxo.encode());
            }
        }

        // merge per-address deltas across shards into whole records
        let mut merged_history: BTreeMap<[u8; HISTORY_KEY_LEN], SubHistory> = BTreeMap::new();
        for shard in &batch.shards {
            for (address, per_hgtx) in &shard.ssh {
                for (hgtx, sub) in per_hgtx {
                    merged_history
                        .entry(history_key(address, hgtx))
                        .or_default()
                        .extend(sub.iter().map(|(key, entry)| (*key, *entry)));
                }
            }
        }

        let mut stxo_batch = WriteBatch::new();
        stxo_batch.reserve(serialized_stxo.len());
        for (key, value) in &serialized_stxo {
            stxo_batch.put(Column::Stxo, *key.as_bytes(), value.as_slice());
        }
        self.store.write_batch(&stxo_batch)?;

        let mut history_batch = WriteBatch::new();
        history_batch.reserve(merged_history.len());
        for (key, sub) in &merged_history {
            history_batch.put(Column::History, *key, encode_sub_history(sub));
        }
        self.store.write_batch(&history_batch)?;

        if self.db_type != DbType::Bare {
            self.commit_tx_hints(batch)?;
        }

        // the sentinel goes in on its own: only its durability marks the
        // batch committed
        let mut sdbi = get_sdbi(self.store, Column::History)?
            .unwrap_or_else(|| StoredDbInfo::new(self.magic, self.db_type));
        sdbi.top_scanned_hash = batch.top_scanned_hash;
        sdbi.top_height = batch.top_height;
        let mut sentinel_batch = WriteBatch::new();
        put_sdbi(&mut sentinel_batch, Column::History, &sdbi);
        self.store.write_batch(&sentinel_batch)?;

        Ok(())
    }

    /// Read-modify-write the hint records touched by this batch. Existing
    /// hints from earlier scans are preserved and the merge deduplicates.
    fn commit_tx_hints(&self, batch: &AccumulatedBatch) -> Result<(), StoreError> {
        let mut fresh: HintMap = HintMap::new();
        for shard in &batch.shards {
            for (tx_hash, outputs) in &shard.utxos {
                let Some(stxo) = outputs.values().next() else {
                    continue;
                };
                fresh
                    .entry(hint_prefix(tx_hash))
                    .or_default()
                    .push(stxo.key.tx_key());
            }
        }

        let mut hints_batch = WriteBatch::new();
        hints_batch.reserve(fresh.len());
        for (prefix, mut keys) in fresh {
            keys.sort_unstable();
            keys.dedup();
            let mut hints = match self.store.get(Column::TxHints, &prefix)? {
                Some(bytes) => TxHints::decode(&bytes)
                    .map_err(|err| StoreError::Backend(err.to_string()))?,
                None => TxHints::default(),
            };
            hints.merge(keys);
            hints_batch.put(Column::TxHints, prefix, hints.encode());
        }
        self.store.write_batch(&hints_batch)?;
        Ok(())
    }
}

/// The sentinel read back: the hash of the highest block whose deltas are
/// durably committed.
pub fn top_scanned_hash<S: KeyValueStore + ?Sized>(
    store: &S,
) -> Result<Option<stashd_primitives::Hash256>, StoreError> {
    Ok(get_sdbi(store, Column::History)?.map(|sdbi| sdbi.top_scanned_hash))
}
