//! Persistence of header records in the `BlkData` column.

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::header::{BlockHeader, HEADER_SIZE};
use stashd_primitives::Hash256;
use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::headers::{ChainError, HeaderChain, HeaderRecord};

pub fn encode_header_record(record: &HeaderRecord) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(HEADER_SIZE + 25);
    encoder.write_bytes(&record.header.consensus_encode());
    encoder.write_u32_le(record.height);
    encoder.write_u8(record.duplicate_id);
    encoder.write_u32_le(record.fnum);
    encoder.write_u64_le(record.offset);
    encoder.write_u32_le(record.num_tx);
    encoder.write_u32_le(record.block_size);
    encoder.into_inner()
}

pub fn decode_header_record(hash: Hash256, bytes: &[u8]) -> Result<HeaderRecord, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let raw_header = decoder.read_fixed::<HEADER_SIZE>()?;
    let header = BlockHeader::consensus_decode(&raw_header)?;
    let height = decoder.read_u32_le()?;
    let duplicate_id = decoder.read_u8()?;
    let fnum = decoder.read_u32_le()?;
    let offset = decoder.read_u64_le()?;
    let num_tx = decoder.read_u32_le()?;
    let block_size = decoder.read_u32_le()?;
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(HeaderRecord {
        header,
        hash,
        height,
        duplicate_id,
        fnum,
        offset,
        num_tx,
        block_size,
    })
}

pub fn put_header_record(batch: &mut WriteBatch, record: &HeaderRecord) {
    batch.put(Column::BlkData, record.hash, encode_header_record(record));
}

#[derive(Debug)]
pub enum HeaderDbError {
    Store(StoreError),
    Chain(ChainError),
    Decode(DecodeError),
}

impl std::fmt::Display for HeaderDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderDbError::Store(err) => write!(f, "{err}"),
            HeaderDbError::Chain(err) => write!(f, "{err}"),
            HeaderDbError::Decode(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for HeaderDbError {}

impl From<StoreError> for HeaderDbError {
    fn from(err: StoreError) -> Self {
        HeaderDbError::Store(err)
    }
}

impl From<ChainError> for HeaderDbError {
    fn from(err: ChainError) -> Self {
        HeaderDbError::Chain(err)
    }
}

impl From<DecodeError> for HeaderDbError {
    fn from(err: DecodeError) -> Self {
        HeaderDbError::Decode(err)
    }
}

/// Load every persisted header record and rebuild the chain view.
///
/// An empty column yields an empty chain (fresh database). Undecodable or
/// non-dense records surface as [`ChainError::Corrupt`] so the caller can
/// force a rebuild.
pub fn load_chain<S: KeyValueStore>(
    store: &S,
    genesis_hash: Hash256,
) -> Result<HeaderChain, HeaderDbError> {
    let entries = store.scan_prefix(Column::BlkData, &[])?;
    let mut records = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let hash: Hash256 = key
            .as_slice()
            .try_into()
            .map_err(|_| ChainError::Corrupt("bad header record key length".to_string()))?;
        records.push(decode_header_record(hash, &value)?);
    }
    Ok(HeaderChain::from_records(genesis_hash, records)?)
}
