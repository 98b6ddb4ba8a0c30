//! Per-column metadata records (SDBI).
//!
//! Stored under a reserved short key in the column itself. The HISTORY
//! column's record carries the top-scanned sentinel: a batch only counts as
//! committed once this record names its top block hash.

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::Hash256;
use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::DbType;

/// Reserved metadata key. All real keys in the indexed columns are longer
/// than four bytes or differently sized, so this cannot collide.
pub const SDBI_KEY: &[u8] = b"sdbi";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoredDbInfo {
    pub magic: [u8; 4],
    pub top_scanned_hash: Hash256,
    pub top_height: u32,
    pub db_type: DbType,
}

impl StoredDbInfo {
    pub fn new(magic: [u8; 4], db_type: DbType) -> Self {
        Self {
            magic,
            top_scanned_hash: [0u8; 32],
            top_height: 0,
            db_type,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(41);
        encoder.write_bytes(&self.magic);
        encoder.write_hash_le(&self.top_scanned_hash);
        encoder.write_u32_le(self.top_height);
        encoder.write_u8(self.db_type.to_u8());
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let magic = decoder.read_fixed::<4>()?;
        let top_scanned_hash = decoder.read_hash_le()?;
        let top_height = decoder.read_u32_le()?;
        let db_type = DbType::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("unknown db type"))?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            magic,
            top_scanned_hash,
            top_height,
            db_type,
        })
    }
}

pub fn get_sdbi<S: KeyValueStore + ?Sized>(
    store: &S,
    column: Column,
) -> Result<Option<StoredDbInfo>, StoreError> {
    match store.get(column, SDBI_KEY)? {
        Some(bytes) => StoredDbInfo::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(err.to_string())),
        None => Ok(None),
    }
}

pub fn put_sdbi(batch: &mut WriteBatch, column: Column, sdbi: &StoredDbInfo) {
    batch.put(column, SDBI_KEY, sdbi.encode());
}

#[cfg(test)]
mod tests {
    use stashd_storage::memory::MemoryStore;

    use super::*;

    #[test]
    fn sdbi_roundtrip() {
        let store = MemoryStore::new();
        let mut sdbi = StoredDbInfo::new([0xfa, 0xbf, 0xb5, 0xda], DbType::Full);
        sdbi.top_scanned_hash = [0x99; 32];
        sdbi.top_height = 1234;

        let mut batch = WriteBatch::new();
        put_sdbi(&mut batch, Column::History, &sdbi);
        store.write_batch(&batch).expect("commit");

        let loaded = get_sdbi(&store, Column::History).expect("get").expect("some");
        assert_eq!(loaded, sdbi);
        assert_eq!(get_sdbi(&store, Column::Ssh).expect("get"), None);
    }
}
