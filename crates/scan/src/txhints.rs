//! Tx-hash-prefix hints: the values of the TXHINTS column.
//!
//! A hint record lists the 6-byte keys of every indexed transaction whose
//! hash starts with the 4-byte key prefix. The first entry is the preferred
//! resolution. Records are read-modify-written so hints from earlier scans
//! survive; merging deduplicates so a re-scan leaves records byte-identical.

use std::collections::BTreeMap;

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::Hash256;

use crate::keys::{TxKey, TX_KEY_LEN};

pub const HINT_PREFIX_LEN: usize = 4;

pub fn hint_prefix(tx_hash: &Hash256) -> [u8; HINT_PREFIX_LEN] {
    let mut out = [0u8; HINT_PREFIX_LEN];
    out.copy_from_slice(&tx_hash[..HINT_PREFIX_LEN]);
    out
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxHints {
    pub keys: Vec<TxKey>,
}

impl TxHints {
    pub fn preferred(&self) -> Option<&TxKey> {
        self.keys.first()
    }

    /// Append keys that are not already present, keeping existing order.
    pub fn merge(&mut self, new_keys: impl IntoIterator<Item = TxKey>) {
        for key in new_keys {
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(1 + self.keys.len() * TX_KEY_LEN);
        encoder.write_varint(self.keys.len() as u64);
        for key in &self.keys {
            encoder.write_bytes(key.as_bytes());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let count = decoder.read_varint()?;
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = decoder.read_fixed::<TX_KEY_LEN>()?;
            keys.push(TxKey::from_slice(&raw).expect("fixed length key"));
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { keys })
    }
}

/// Batch-local hint accumulation keyed by hash prefix.
pub type HintMap = BTreeMap<[u8; HINT_PREFIX_LEN], Vec<TxKey>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_roundtrip() {
        let mut hints = TxHints::default();
        hints.merge([TxKey::new(10, 0, 2), TxKey::new(11, 0, 0)]);
        let decoded = TxHints::decode(&hints.encode()).expect("decode");
        assert_eq!(decoded, hints);
        assert_eq!(decoded.preferred(), Some(&TxKey::new(10, 0, 2)));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut hints = TxHints::default();
        hints.merge([TxKey::new(10, 0, 2)]);
        let once = hints.encode();
        hints.merge([TxKey::new(10, 0, 2)]);
        assert_eq!(hints.encode(), once);
    }

    #[test]
    fn merge_preserves_existing_preferred() {
        let mut hints = TxHints {
            keys: vec![TxKey::new(1, 0, 0)],
        };
        hints.merge([TxKey::new(2, 0, 0)]);
        assert_eq!(hints.preferred(), Some(&TxKey::new(1, 0, 0)));
        assert_eq!(hints.keys.len(), 2);
    }
}
