//! The four-stage scan pipeline: readers, output scanners, input scanners,
//! and a single writer.
//!
//! A batch covers the heights reaching into the next block file (or the
//! chain top). Within a batch, reader thread `i` materializes heights
//! `start + i, start + i + T, …` and feeds its paired scanner over a
//! bounded channel whose capacity is the lookahead: a reader that gets too
//! far ahead blocks on the send. Output scanning must finish in every
//! shard before any input resolves, because a transaction may spend an
//! output produced in a sibling shard of the same batch; the coordinator
//! joins all output scanners, merges their utxo maps, and only then starts
//! the input phase against the merged read-only view. Completed batches
//! flow to the writer over another bounded channel and are committed in
//! ascending height order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use stashd_blockfiles::fileset::{BlockFileMap, BlockFileSet, FileSetError};
use stashd_blockfiles::parse::BlockData;
use stashd_chain::{ChainError, HeaderChain};
use stashd_primitives::encoding::{Decodable, Decoder};
use stashd_primitives::outpoint::OutPoint;
use stashd_primitives::script::{script_to_address, AddressPrefixes};
use stashd_primitives::{hash_to_hex, Hash256};
use stashd_storage::{KeyValueStore, StoreError};

use crate::batch::{
    merge_into_utxo_map, prune_spent_outputs, AccumulatedBatch, ShardDeltas, UtxoMap,
};
use crate::commit::IndexCommitter;
use crate::filter::AddressFilter;
use crate::keys::IndexKey;
use crate::progress::{ProgressMeasurer, ProgressSink, ScanPhase};
use crate::stxo::StoredOutput;
use crate::DbType;

#[derive(Clone, Copy, Debug)]
pub struct ScanConfig {
    pub thread_count: usize,
    pub n_files_per_batch: u32,
    pub n_blocks_look_ahead: usize,
    pub db_type: DbType,
}

impl ScanConfig {
    /// Size the pipeline from the configured ram-usage level: each level
    /// buys lookahead, and every four levels widen the batch by a file.
    pub fn from_level(thread_count: usize, ram_usage_level: usize, db_type: DbType) -> Self {
        let level = ram_usage_level.max(1);
        Self {
            thread_count: thread_count.max(1),
            n_files_per_batch: ((level / 4) as u32).max(1),
            n_blocks_look_ahead: 4 * level,
            db_type,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanSummary {
    pub top_scanned_hash: Option<Hash256>,
    pub blocks_scanned: u64,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum ScanError {
    Chain(ChainError),
    File(FileSetError),
    Store(StoreError),
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::Chain(err) => write!(f, "{err}"),
            ScanError::File(err) => write!(f, "{err}"),
            ScanError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<ChainError> for ScanError {
    fn from(err: ChainError) -> Self {
        ScanError::Chain(err)
    }
}

impl From<FileSetError> for ScanError {
    fn from(err: FileSetError) -> Self {
        ScanError::File(err)
    }
}

impl From<StoreError> for ScanError {
    fn from(err: StoreError) -> Self {
        ScanError::Store(err)
    }
}

pub struct ScanPipeline<'a, S> {
    files: &'a BlockFileSet,
    chain: &'a HeaderChain,
    store: &'a S,
    filter: &'a dyn AddressFilter,
    prefixes: AddressPrefixes,
    magic: [u8; 4],
    config: ScanConfig,
    stop: Arc<AtomicBool>,
    sink: &'a dyn ProgressSink,
    utxo_map: UtxoMap,
}

impl<'a, S: KeyValueStore> ScanPipeline<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        files: &'a BlockFileSet,
        chain: &'a HeaderChain,
        store: &'a S,
        filter: &'a dyn AddressFilter,
        prefixes: AddressPrefixes,
        magic: [u8; 4],
        config: ScanConfig,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            files,
            chain,
            store,
            filter,
            prefixes,
            magic,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            sink,
            utxo_map: UtxoMap::new(),
        }
    }

    /// Handle for requesting a cooperative stop from another thread.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Share an externally owned stop flag instead of the pipeline's own.
    pub fn set_stop_flag(&mut self, stop: Arc<AtomicBool>) {
        self.stop = stop;
    }

    /// Scan from `from_height` to the current chain top, committing
    /// batches in ascending height order.
    pub fn scan(&mut self, from_height: u32) -> Result<ScanSummary, ScanError> {
        let files = self.files;
        let chain = self.chain;
        let prefixes = self.prefixes;
        let config = self.config;
        let stop = Arc::clone(&self.stop);
        let sink = self.sink;
        let filter_source = self.filter;
        let utxo_map = &mut self.utxo_map;

        let mut summary = ScanSummary::default();

        let top_height = match chain.top() {
            Ok(record) => record.height,
            Err(_) => {
                stashd_log::log_warn!("no headers to scan");
                return Ok(summary);
            }
        };
        if top_height < from_height {
            stashd_log::log_warn!(
                "tried to scan the chain from height {from_height} beyond current top {top_height}, already up to date"
            );
            return Ok(summary);
        }

        let total_bytes = files.total_bytes();
        let mut measurer = ProgressMeasurer::new(total_bytes);
        let committer = IndexCommitter::new(self.store, config.db_type, self.magic);
        let (batch_tx, batch_rx) = bounded::<AccumulatedBatch>(2);

        thread::scope(|scope| -> Result<(), ScanError> {
            let writer_stop = Arc::clone(&stop);
            let writer = scope.spawn(move || -> Result<(), StoreError> {
                while let Ok(batch) = batch_rx.recv() {
                    if let Err(err) = committer.commit_batch(&batch) {
                        // fatal: no sentinel update, the next startup
                        // re-scans the incomplete batch
                        writer_stop.store(true, Ordering::Relaxed);
                        return Err(err);
                    }
                }
                Ok(())
            });

            let mut scan_loop = || -> Result<(), ScanError> {
                let mut start_height = from_height;
                while start_height <= top_height {
                    if stop.load(Ordering::Relaxed) {
                        summary.cancelled = true;
                        break;
                    }

                    let end_height =
                        batch_end_height(chain, start_height, top_height, config.n_files_per_batch)?;
                    let filter = filter_source.snapshot();

                    // phase A: readers feed output scanners shard by shard
                    let mut a_results: Vec<(Vec<BlockData>, ShardDeltas)> =
                        Vec::with_capacity(config.thread_count);
                    thread::scope(|batch_scope| -> Result<(), ScanError> {
                        let mut readers = Vec::with_capacity(config.thread_count);
                        let mut scanners = Vec::with_capacity(config.thread_count);
                        for shard_index in 0..config.thread_count {
                            let (block_tx, block_rx) =
                                bounded::<BlockData>(config.n_blocks_look_ahead.max(1));
                            let reader_stop = Arc::clone(&stop);
                            readers.push(batch_scope.spawn(move || {
                                read_shard(
                                    files,
                                    chain,
                                    shard_index,
                                    config.thread_count,
                                    start_height,
                                    end_height,
                                    reader_stop,
                                    block_tx,
                                )
                            }));
                            let shard_filter = Arc::clone(&filter);
                            scanners.push(batch_scope.spawn(move || {
                                scan_outputs(block_rx, shard_filter, prefixes)
                            }));
                        }

                        let mut first_error = None;
                        for reader in readers {
                            if let Err(err) = reader.join().expect("reader thread") {
                                if first_error.is_none() {
                                    first_error = Some(err);
                                }
                            }
                        }
                        for scanner in scanners {
                            a_results.push(scanner.join().expect("output scanner thread"));
                        }
                        match first_error {
                            Some(err) => Err(err),
                            None => Ok(()),
                        }
                    })?;

                    let (blocks_by_shard, a_shards): (Vec<Vec<BlockData>>, Vec<ShardDeltas>) =
                        a_results.into_iter().unzip();

                    // phase barrier: all outputs of the batch become
                    // visible before any input resolves
                    merge_into_utxo_map(utxo_map, &a_shards);

                    // phase B against the read-only merged view
                    let utxo_view: &UtxoMap = utxo_map;
                    let mut b_shards: Vec<ShardDeltas> =
                        Vec::with_capacity(config.thread_count);
                    thread::scope(|batch_scope| {
                        let mut handles = Vec::with_capacity(blocks_by_shard.len());
                        for blocks in &blocks_by_shard {
                            handles
                                .push(batch_scope.spawn(move || scan_inputs(blocks, utxo_view)));
                        }
                        for handle in handles {
                            b_shards.push(handle.join().expect("input scanner thread"));
                        }
                    });
                    prune_spent_outputs(utxo_map, &b_shards);

                    let top_record = chain.header_by_height(end_height)?;
                    let top_hash = top_record.hash;
                    let global_offset = files.offset_at_start_of_file(top_record.fnum)?
                        + top_record.offset
                        + 8
                        + top_record.block_size as u64;

                    let accumulated = AccumulatedBatch {
                        shards: a_shards.into_iter().chain(b_shards).collect(),
                        top_scanned_hash: top_hash,
                        top_height: end_height,
                    };
                    if batch_tx.send(accumulated).is_err() {
                        // writer bailed out; its error surfaces at the join
                        break;
                    }

                    summary.top_scanned_hash = Some(top_hash);
                    summary.blocks_scanned += (end_height - start_height + 1) as u64;

                    measurer.advance(global_offset);
                    let fraction = if total_bytes == 0 {
                        1.0
                    } else {
                        global_offset as f64 / total_bytes as f64
                    };
                    sink.progress(
                        ScanPhase::Scan,
                        fraction,
                        measurer.elapsed_seconds(),
                        (fraction * 100.0) as u32,
                    );

                    start_height = end_height + 1;
                }
                Ok(())
            };
            let loop_result = scan_loop();

            drop(batch_tx);
            let writer_result = writer.join().expect("writer thread");
            loop_result?;
            writer_result.map_err(ScanError::Store)
        })?;

        if let Some(top) = &summary.top_scanned_hash {
            stashd_log::log_info!(
                "scanned {} blocks up to {}",
                summary.blocks_scanned,
                hash_to_hex(top)
            );
        }
        Ok(summary)
    }
}

/// Last height of the batch starting at `start`: the first height whose
/// block lives `n_files_per_batch` files past the starting block's file,
/// capped at the chain top.
fn batch_end_height(
    chain: &HeaderChain,
    start: u32,
    top: u32,
    n_files_per_batch: u32,
) -> Result<u32, ScanError> {
    let mut record = chain.header_by_height(start)?;
    let target_fnum = record.fnum + n_files_per_batch;
    let mut height = start;
    while record.fnum < target_fnum && height < top {
        height += 1;
        record = chain.header_by_height(height)?;
    }
    Ok(height)
}

/// Reader stage: materialize this shard's interleaved heights and hand
/// them to the paired scanner. The bounded channel is the backpressure.
#[allow(clippy::too_many_arguments)]
fn read_shard(
    files: &BlockFileSet,
    chain: &HeaderChain,
    shard_index: usize,
    thread_count: usize,
    start_height: u32,
    end_height: u32,
    stop: Arc<AtomicBool>,
    blocks: Sender<BlockData>,
) -> Result<(), ScanError> {
    let mut maps: HashMap<u32, Arc<BlockFileMap>> = HashMap::new();
    let mut height = start_height + shard_index as u32;

    while height <= end_height {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let record = chain.header_by_height(height)?;
        let map = match maps.get(&record.fnum) {
            Some(map) => Arc::clone(map),
            None => {
                let map = files.open(record.fnum)?;
                maps.insert(record.fnum, Arc::clone(&map));
                map
            }
        };

        match BlockData::parse(
            map,
            record.offset + 8,
            record.block_size,
            record.height,
            record.duplicate_id,
        ) {
            Ok(block) if block.hash == record.hash => {
                if blocks.send(block).is_err() {
                    break;
                }
            }
            Ok(block) => {
                stashd_log::log_error!(
                    "block at height {height} does not back expected hash {} (found {})",
                    hash_to_hex(&record.hash),
                    hash_to_hex(&block.hash)
                );
            }
            Err(err) => {
                // contained: the block is unscannable, move on
                stashd_log::log_error!("skipping unscannable block at height {height}: {err}");
            }
        }

        height += thread_count as u32;
    }
    Ok(())
}

/// Phase A: resolve every output against the filter, building the shard's
/// utxo map and credit history entries. Blocks are retained for phase B.
fn scan_outputs(
    blocks: Receiver<BlockData>,
    filter: Arc<dyn AddressFilter>,
    prefixes: AddressPrefixes,
) -> (Vec<BlockData>, ShardDeltas) {
    let mut retained = Vec::new();
    let mut deltas = ShardDeltas::default();

    while let Ok(block) = blocks.recv() {
        for (tx_index, tx) in block.txs.iter().enumerate() {
            let mut tx_hash: Option<Hash256> = None;
            for (out_index, span) in tx.outputs.iter().enumerate() {
                let bytes = block.span_bytes(*span);
                let Some((value, script)) = parse_output(bytes) else {
                    stashd_log::log_error!(
                        "malformed output {out_index} in tx {tx_index} at height {}",
                        block.height
                    );
                    continue;
                };
                let Some(address) = script_to_address(script, &prefixes) else {
                    continue;
                };
                if !filter.has_address(&address) {
                    continue;
                }

                let parent_tx_hash = *tx_hash.get_or_insert_with(|| block.tx_hash(tx_index));
                deltas.add_utxo(StoredOutput {
                    key: IndexKey::new(
                        block.height,
                        block.duplicate_id,
                        tx_index as u16,
                        out_index as u16,
                    ),
                    address,
                    value,
                    parent_tx_hash,
                    raw_output: bytes.to_vec(),
                    spent_by: None,
                });
            }
        }
        retained.push(block);
    }

    (retained, deltas)
}

/// Phase B: resolve every input against the merged utxo view, emitting
/// spent records and debit history entries.
fn scan_inputs(blocks: &[BlockData], utxo_map: &UtxoMap) -> ShardDeltas {
    let mut deltas = ShardDeltas::default();

    for block in blocks {
        for (tx_index, tx) in block.txs.iter().enumerate() {
            for (in_index, span) in tx.inputs.iter().enumerate() {
                let mut decoder = Decoder::new(block.span_bytes(*span));
                let Ok(outpoint) = OutPoint::consensus_decode(&mut decoder) else {
                    continue;
                };
                if outpoint.is_null() {
                    continue; // coinbase
                }
                let Some(outputs) = utxo_map.get(&outpoint.hash) else {
                    continue;
                };
                let Ok(out_index) = u16::try_from(outpoint.index) else {
                    continue;
                };
                let Some(stxo) = outputs.get(&out_index) else {
                    continue;
                };

                let mut spent = stxo.clone();
                spent.spent_by = Some(IndexKey::new(
                    block.height,
                    block.duplicate_id,
                    tx_index as u16,
                    in_index as u16,
                ));
                deltas.add_spent(spent);
            }
        }
    }

    deltas
}

/// Split an output span into its value and script.
fn parse_output(bytes: &[u8]) -> Option<(i64, &[u8])> {
    let mut decoder = Decoder::new(bytes);
    let value = decoder.read_i64_le().ok()?;
    let script_len = decoder.read_varint().ok()? as usize;
    let start = decoder.position();
    bytes.get(start..start + script_len).map(|script| (value, script))
}
