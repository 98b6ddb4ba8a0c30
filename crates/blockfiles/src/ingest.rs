//! Reading new headers out of the block files into the chain view.
//!
//! Runs after reconciliation: every framed header from the resume position
//! to the end of the files is parsed, linked into the chain, and persisted
//! to the `BlkData` column.

use stashd_chain::headerdb::put_header_record;
use stashd_chain::{ChainError, HeaderChain};
use stashd_primitives::header::BlockHeader;
use stashd_primitives::{hash_to_hex, Hash256};
use stashd_storage::{KeyValueStore, StoreError, WriteBatch};

use crate::fileset::{BlockFileSet, FileSetError};
use crate::parse::{payload_tx_count, scan_framed_blocks, FilePosition, ReadControl};

#[derive(Debug)]
pub enum IngestError {
    File(FileSetError),
    Store(StoreError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::File(err) => write!(f, "{err}"),
            IngestError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<FileSetError> for IngestError {
    fn from(err: FileSetError) -> Self {
        IngestError::File(err)
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

/// Ingest headers from `from` to the end of the discovered files.
///
/// Unparseable blocks are logged and skipped (the framing scan already
/// resyncs past byte garbage); a header whose parent is unknown is dropped
/// the same way so a wrong-network frame cannot poison the chain. Returns
/// the hash of the chain top afterwards, or `None` when the chain is still
/// empty.
pub fn ingest_headers<S: KeyValueStore>(
    files: &BlockFileSet,
    magic: &[u8; 4],
    chain: &mut HeaderChain,
    store: &S,
    from: FilePosition,
) -> Result<Option<Hash256>, IngestError> {
    let num_files = files.num_files() as u32;

    for fnum in from.fnum..num_files {
        let map = files.open(fnum)?;
        let start = if fnum == from.fnum { from.offset } else { 0 };
        let mut touched: Vec<Hash256> = Vec::new();

        scan_framed_blocks(&map, magic, start, u64::MAX, |payload, pos, blk_size| {
            let header = match BlockHeader::consensus_decode(payload) {
                Ok(header) => header,
                Err(err) => {
                    stashd_log::log_error!(
                        "unparseable header at file {} offset {}: {err}",
                        pos.fnum,
                        pos.offset
                    );
                    return ReadControl::Continue;
                }
            };
            let num_tx = match payload_tx_count(payload) {
                Ok(count) => count as u32,
                Err(err) => {
                    stashd_log::log_error!(
                        "unreadable tx count at file {} offset {}: {err}",
                        pos.fnum,
                        pos.offset
                    );
                    return ReadControl::Continue;
                }
            };

            match chain.add_header(header, pos.fnum, pos.offset, num_tx, blk_size) {
                Ok(hash) => touched.push(hash),
                Err(ChainError::UnknownParent(parent)) => {
                    stashd_log::log_warn!(
                        "skipping block at file {} offset {} with unknown parent {}",
                        pos.fnum,
                        pos.offset,
                        hash_to_hex(&parent)
                    );
                }
                Err(err) => {
                    stashd_log::log_error!(
                        "failed to link header at file {} offset {}: {err}",
                        pos.fnum,
                        pos.offset
                    );
                }
            }
            ReadControl::Continue
        });

        if !touched.is_empty() {
            let mut batch = WriteBatch::new();
            batch.reserve(touched.len());
            for hash in &touched {
                if let Some(record) = chain.header_by_hash(hash) {
                    put_header_record(&mut batch, record);
                }
            }
            store.write_batch(&batch)?;
        }
    }

    Ok(chain.top().ok().map(|record| record.hash))
}
