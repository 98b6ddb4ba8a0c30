//! Batch-scoped working sets: one shard per reader/scanner pair, merged
//! once per batch at the phase barrier.

use std::collections::{BTreeMap, HashMap};

use stashd_primitives::script::ScriptAddress;
use stashd_primitives::Hash256;

use crate::keys::HGTX_LEN;
use crate::stxo::StoredOutput;
use crate::subssh::{SubHistory, TxioEntry};

/// Outputs produced by a scan run, keyed by parent tx hash then output
/// index. Spent entries are pruned as batches complete, so at any point the
/// map holds exactly the outputs still unspent.
pub type UtxoMap = HashMap<Hash256, HashMap<u16, StoredOutput>>;

/// Per-address history deltas: address, then hgtx, then the sub-history.
pub type SshDeltas = HashMap<ScriptAddress, BTreeMap<[u8; HGTX_LEN], SubHistory>>;

/// One shard's private working set. Nothing in it is shared while the
/// phases run.
#[derive(Default)]
pub struct ShardDeltas {
    pub utxos: UtxoMap,
    pub ssh: SshDeltas,
    pub spent: Vec<StoredOutput>,
}

impl ShardDeltas {
    pub fn add_utxo(&mut self, stxo: StoredOutput) {
        let entry = TxioEntry {
            tx_out_key: stxo.key,
            tx_in_key: None,
            value: stxo.value,
        };
        self.add_ssh_entry(stxo.address, entry);
        self.utxos
            .entry(stxo.parent_tx_hash)
            .or_default()
            .insert(stxo.key.io_index(), stxo);
    }

    pub fn add_spent(&mut self, stxo: StoredOutput) {
        debug_assert!(stxo.is_spent());
        let spender = stxo.spent_by.expect("spent output has a spender");
        let entry = TxioEntry {
            tx_out_key: stxo.key,
            tx_in_key: Some(spender),
            value: stxo.value,
        };
        self.add_ssh_entry(stxo.address, entry);
        self.spent.push(stxo);
    }

    fn add_ssh_entry(&mut self, address: ScriptAddress, entry: TxioEntry) {
        self.ssh
            .entry(address)
            .or_default()
            .entry(entry.sort_key().hgtx())
            .or_default()
            .insert(entry.sort_key(), entry);
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty() && self.ssh.is_empty() && self.spent.is_empty()
    }
}

/// A completed batch on its way to the writer.
pub struct AccumulatedBatch {
    pub shards: Vec<ShardDeltas>,
    pub top_scanned_hash: Hash256,
    pub top_height: u32,
}

/// Copy a batch's fresh outputs into the run-wide utxo map.
pub fn merge_into_utxo_map(utxo_map: &mut UtxoMap, shards: &[ShardDeltas]) {
    for shard in shards {
        for (tx_hash, outputs) in &shard.utxos {
            let slot = utxo_map.entry(*tx_hash).or_default();
            for (io_index, stxo) in outputs {
                slot.insert(*io_index, stxo.clone());
            }
        }
    }
}

/// Drop outputs the batch spent from the run-wide utxo map so they are not
/// spendable twice and not persisted as unspent by later batches.
pub fn prune_spent_outputs(utxo_map: &mut UtxoMap, shards: &[ShardDeltas]) {
    for shard in shards {
        for stxo in &shard.spent {
            if let Some(outputs) = utxo_map.get_mut(&stxo.parent_tx_hash) {
                outputs.remove(&stxo.key.io_index());
                if outputs.is_empty() {
                    utxo_map.remove(&stxo.parent_tx_hash);
                }
            }
        }
    }
}
