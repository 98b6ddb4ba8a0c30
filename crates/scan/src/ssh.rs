//! Per-address aggregation: folding sub-history records into one balance
//! record per address, with per-height txio counts alongside.
//!
//! Runs after a scan completes and stands alone for `RescanSSH` recovery.

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::script::{ScriptAddress, ADDRESS_LEN};
use stashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::filter::AddressFilter;
use crate::keys::HGTX_LEN;
use crate::sdbi::{get_sdbi, put_sdbi, StoredDbInfo};
use crate::subssh::{decode_sub_history, parse_history_key};
use crate::DbType;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SshEntry {
    pub balance: i64,
    pub txio_count: u64,
    pub scanned_height: u32,
}

impl SshEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(20);
        encoder.write_i64_le(self.balance);
        encoder.write_u64_le(self.txio_count);
        encoder.write_u32_le(self.scanned_height);
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let balance = decoder.read_i64_le()?;
        let txio_count = decoder.read_u64_le()?;
        let scanned_height = decoder.read_u32_le()?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            balance,
            txio_count,
            scanned_height,
        })
    }
}

pub fn subssh_key(address: &ScriptAddress, hgtx: &[u8; HGTX_LEN]) -> [u8; ADDRESS_LEN + HGTX_LEN] {
    let mut out = [0u8; ADDRESS_LEN + HGTX_LEN];
    out[..ADDRESS_LEN].copy_from_slice(address);
    out[ADDRESS_LEN..].copy_from_slice(hgtx);
    out
}

/// Fold the history of every filtered address into its aggregate record.
///
/// Credits add, debits subtract, and every txio counts once. The Ssh
/// column's metadata record is stamped with the aggregation height.
pub fn update_ssh<S: KeyValueStore>(
    store: &S,
    filter: &dyn AddressFilter,
    top_height: u32,
    magic: [u8; 4],
    db_type: DbType,
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();

    for address in filter.addresses() {
        let mut balance = 0i64;
        let mut txio_count = 0u64;
        let mut per_hgtx: Vec<([u8; HGTX_LEN], u64)> = Vec::new();

        let mut visitor = |key: &[u8], value: &[u8]| -> Result<(), StoreError> {
            let Some((_, hgtx)) = parse_history_key(key) else {
                return Ok(());
            };
            let sub = decode_sub_history(value)
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            let mut count = 0u64;
            for entry in sub.values() {
                if entry.is_spending() {
                    balance -= entry.value;
                } else {
                    balance += entry.value;
                }
                count += 1;
            }
            txio_count += count;
            per_hgtx.push((hgtx, count));
            Ok(())
        };
        store.for_each_prefix(Column::History, &address, &mut visitor)?;

        if txio_count == 0 {
            continue;
        }

        let entry = SshEntry {
            balance,
            txio_count,
            scanned_height: top_height,
        };
        batch.put(Column::Ssh, address, entry.encode());
        for (hgtx, count) in per_hgtx {
            let mut encoder = Encoder::new();
            encoder.write_varint(count);
            batch.put(Column::SubSsh, subssh_key(&address, &hgtx), encoder.into_inner());
        }
    }

    let mut sdbi =
        get_sdbi(store, Column::Ssh)?.unwrap_or_else(|| StoredDbInfo::new(magic, db_type));
    sdbi.top_height = top_height;
    if let Some(history_sdbi) = get_sdbi(store, Column::History)? {
        sdbi.top_scanned_hash = history_sdbi.top_scanned_hash;
    }
    put_sdbi(&mut batch, Column::Ssh, &sdbi);

    store.write_batch(&batch)
}

/// Read one address's aggregate record.
pub fn get_ssh_entry<S: KeyValueStore + ?Sized>(
    store: &S,
    address: &ScriptAddress,
) -> Result<Option<SshEntry>, StoreError> {
    match store.get(Column::Ssh, address)? {
        Some(bytes) => SshEntry::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(err.to_string())),
        None => Ok(None),
    }
}
