//! Per-address sub-history records: the values of the HISTORY column.
//!
//! One record covers one address at one `hgtx` (height + duplicate id). An
//! entry is keyed by the index key of the side that touched the address: the
//! output key for a credit, the consuming input key for a debit.

use std::collections::BTreeMap;

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::script::{ScriptAddress, ADDRESS_LEN};

use crate::keys::{IndexKey, HGTX_LEN, INDEX_KEY_LEN};

const FLAG_HAS_TXIN: u8 = 1 << 0;

pub const HISTORY_KEY_LEN: usize = ADDRESS_LEN + HGTX_LEN;

pub fn history_key(address: &ScriptAddress, hgtx: &[u8; HGTX_LEN]) -> [u8; HISTORY_KEY_LEN] {
    let mut out = [0u8; HISTORY_KEY_LEN];
    out[..ADDRESS_LEN].copy_from_slice(address);
    out[ADDRESS_LEN..].copy_from_slice(hgtx);
    out
}

pub fn parse_history_key(key: &[u8]) -> Option<(ScriptAddress, [u8; HGTX_LEN])> {
    if key.len() != HISTORY_KEY_LEN {
        return None;
    }
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&key[..ADDRESS_LEN]);
    let mut hgtx = [0u8; HGTX_LEN];
    hgtx.copy_from_slice(&key[ADDRESS_LEN..]);
    Some((address, hgtx))
}

/// One credit or debit against an address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxioEntry {
    pub tx_out_key: IndexKey,
    pub tx_in_key: Option<IndexKey>,
    pub value: i64,
}

impl TxioEntry {
    pub fn is_spending(&self) -> bool {
        self.tx_in_key.is_some()
    }

    /// The key this entry sorts under inside the sub-history.
    pub fn sort_key(&self) -> IndexKey {
        self.tx_in_key.unwrap_or(self.tx_out_key)
    }
}

pub type SubHistory = BTreeMap<IndexKey, TxioEntry>;

pub fn encode_sub_history(entries: &SubHistory) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(1 + entries.len() * 25);
    encoder.write_varint(entries.len() as u64);
    for (_, entry) in entries.iter() {
        let flags = if entry.is_spending() { FLAG_HAS_TXIN } else { 0 };
        encoder.write_u8(flags);
        encoder.write_bytes(entry.tx_out_key.as_bytes());
        if let Some(tx_in_key) = &entry.tx_in_key {
            encoder.write_bytes(tx_in_key.as_bytes());
        }
        encoder.write_i64_le(entry.value);
    }
    encoder.into_inner()
}

pub fn decode_sub_history(bytes: &[u8]) -> Result<SubHistory, DecodeError> {
    let mut decoder = Decoder::new(bytes);
    let count = decoder.read_varint()?;
    let mut entries = SubHistory::new();
    for _ in 0..count {
        let flags = decoder.read_u8()?;
        let tx_out_key = IndexKey::from_slice(&decoder.read_fixed::<INDEX_KEY_LEN>()?)
            .expect("fixed length key");
        let tx_in_key = if flags & FLAG_HAS_TXIN != 0 {
            Some(
                IndexKey::from_slice(&decoder.read_fixed::<INDEX_KEY_LEN>()?)
                    .expect("fixed length key"),
            )
        } else {
            None
        };
        let value = decoder.read_i64_le()?;
        let entry = TxioEntry {
            tx_out_key,
            tx_in_key,
            value,
        };
        entries.insert(entry.sort_key(), entry);
    }
    if !decoder.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_history_roundtrip() {
        let mut entries = SubHistory::new();
        let credit = TxioEntry {
            tx_out_key: IndexKey::new(4, 0, 0, 1),
            tx_in_key: None,
            value: 75_000,
        };
        let debit = TxioEntry {
            tx_out_key: IndexKey::new(3, 0, 2, 0),
            tx_in_key: Some(IndexKey::new(4, 0, 1, 0)),
            value: 20_000,
        };
        entries.insert(credit.sort_key(), credit);
        entries.insert(debit.sort_key(), debit);

        let bytes = encode_sub_history(&entries);
        let decoded = decode_sub_history(&bytes).expect("decode");
        assert_eq!(decoded, entries);
        assert!(decoded[&IndexKey::new(4, 0, 1, 0)].is_spending());
    }

    #[test]
    fn history_key_layout() {
        let address = [0x42; ADDRESS_LEN];
        let key = history_key(&address, &[0, 0, 9, 0]);
        assert_eq!(key.len(), HISTORY_KEY_LEN);
        assert!(key.starts_with(&address));
        let (parsed_address, hgtx) = parse_history_key(&key).expect("parse");
        assert_eq!(parsed_address, address);
        assert_eq!(hgtx, [0, 0, 9, 0]);
    }
}
