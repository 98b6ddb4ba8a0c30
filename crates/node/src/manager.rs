//! Startup and sync wiring: the piece that owns the file set, the header
//! chain, and the address filter, and drives reconcile → ingest → scan.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use stashd_blockfiles::fileset::{BlockFileSet, FileSetError};
use stashd_blockfiles::ingest::{ingest_headers, IngestError};
use stashd_blockfiles::parse::FilePosition;
use stashd_blockfiles::reconcile::{find_first_unrecognized_header, Reconciliation};
use stashd_chain::headerdb::{load_chain, HeaderDbError};
use stashd_chain::{ChainParams, HeaderChain};
use stashd_primitives::script::ScriptAddress;
use stashd_primitives::hash_to_hex;
use stashd_scan::pipeline::{ScanConfig, ScanError, ScanPipeline, ScanSummary};
use stashd_scan::progress::{ProgressSink, ScanPhase};
use stashd_scan::reset::reset_databases;
use stashd_scan::ssh::update_ssh;
use stashd_scan::{top_scanned_hash, InitMode, SharedAddressFilter};
use stashd_storage::{clear_column, Column, KeyValueStore, StoreError};

use crate::registry::{register_addresses, registered_addresses};

#[derive(Debug)]
pub enum NodeError {
    File(FileSetError),
    Store(StoreError),
    Ingest(IngestError),
    Scan(ScanError),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::File(err) => write!(f, "{err}"),
            NodeError::Store(err) => write!(f, "{err}"),
            NodeError::Ingest(err) => write!(f, "{err}"),
            NodeError::Scan(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<FileSetError> for NodeError {
    fn from(err: FileSetError) -> Self {
        NodeError::File(err)
    }
}

impl From<StoreError> for NodeError {
    fn from(err: StoreError) -> Self {
        NodeError::Store(err)
    }
}

impl From<IngestError> for NodeError {
    fn from(err: IngestError) -> Self {
        NodeError::Ingest(err)
    }
}

impl From<ScanError> for NodeError {
    fn from(err: ScanError) -> Self {
        NodeError::Scan(err)
    }
}

pub struct BlockDataManager<'a, S> {
    store: &'a S,
    params: ChainParams,
    scan_config: ScanConfig,
    files: BlockFileSet,
    chain: HeaderChain,
    filter: SharedAddressFilter,
    stop: Arc<AtomicBool>,
}

impl<'a, S: KeyValueStore> BlockDataManager<'a, S> {
    pub fn open(
        store: &'a S,
        params: ChainParams,
        scan_config: ScanConfig,
        blk_file_dir: impl Into<PathBuf>,
    ) -> Result<Self, NodeError> {
        let filter = SharedAddressFilter::new(registered_addresses(store)?);
        let chain = HeaderChain::new(params.genesis_block_hash);
        Ok(Self {
            store,
            params,
            scan_config,
            files: BlockFileSet::new(blk_file_dir),
            chain,
            filter,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn chain(&self) -> &HeaderChain {
        &self.chain
    }

    pub fn filter(&self) -> &SharedAddressFilter {
        &self.filter
    }

    /// Cooperative cancel handle shared with the running scan.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Register wallet addresses; they persist across resets and are
    /// picked up by the next scan pass.
    pub fn register_addresses(&self, addresses: &[ScriptAddress]) -> Result<(), NodeError> {
        register_addresses(self.store, addresses)?;
        self.filter.register_batch(addresses.iter().copied());
        Ok(())
    }

    /// First sync after startup, honoring the configured reset mode.
    pub fn initial_sync(
        &mut self,
        mode: InitMode,
        sink: &dyn ProgressSink,
    ) -> Result<ScanSummary, NodeError> {
        reset_databases(self.store, mode)?;
        if mode == InitMode::Rebuild {
            self.chain = HeaderChain::new(self.params.genesis_block_hash);
        }
        self.sync(sink)
    }

    /// Re-check the block files for growth and scan whatever is new.
    pub fn update(&mut self, sink: &dyn ProgressSink) -> Result<ScanSummary, NodeError> {
        self.sync(sink)
    }

    fn sync(&mut self, sink: &dyn ProgressSink) -> Result<ScanSummary, NodeError> {
        self.files.discover()?;

        if self.chain.is_empty() {
            self.chain = match load_chain(self.store, self.params.genesis_block_hash) {
                Ok(chain) => chain,
                Err(HeaderDbError::Store(err)) => return Err(err.into()),
                Err(err) => {
                    stashd_log::log_warn!(
                        "persisted header records are unusable ({err}), rebuilding them"
                    );
                    clear_column(self.store, Column::BlkData)?;
                    HeaderChain::new(self.params.genesis_block_hash)
                }
            };
        }

        let magic = self.params.magic_bytes;
        let position =
            match find_first_unrecognized_header(&self.files, &magic, &mut self.chain)? {
                Reconciliation::Resume(position) => position,
                Reconciliation::RescanFromZero { reason } => {
                    stashd_log::log_warn!(
                        "header database inconsistent ({reason}), rebuilding from file 0"
                    );
                    reset_databases(self.store, InitMode::Rebuild)?;
                    self.chain = HeaderChain::new(self.params.genesis_block_hash);
                    FilePosition { fnum: 0, offset: 0 }
                }
            };

        ingest_headers(&self.files, &magic, &mut self.chain, self.store, position)?;
        sink.progress(ScanPhase::Headers, 1.0, 0, 100);

        let from_height = match top_scanned_hash(self.store)? {
            Some(hash) if hash != [0u8; 32] => match self.chain.header_by_hash(&hash) {
                Some(record) => record.height + 1,
                None => {
                    stashd_log::log_warn!(
                        "top scanned block {} is not in the chain, rescanning history",
                        hash_to_hex(&hash)
                    );
                    0
                }
            },
            _ => 0,
        };

        let mut pipeline = ScanPipeline::new(
            &self.files,
            &self.chain,
            self.store,
            &self.filter,
            self.params.address_prefixes,
            magic,
            self.scan_config,
            sink,
        );
        pipeline.set_stop_flag(Arc::clone(&self.stop));
        let summary = pipeline.scan(from_height)?;

        if let Ok(top) = self.chain.top_height() {
            update_ssh(
                self.store,
                &self.filter,
                top,
                magic,
                self.scan_config.db_type,
            )?;
            sink.progress(ScanPhase::SshUpdate, 1.0, 0, 100);
        }

        Ok(summary)
    }
}
