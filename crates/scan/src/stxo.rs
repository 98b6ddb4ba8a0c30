//! Stored output records: the values of the STXO column.

use stashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use stashd_primitives::script::{ScriptAddress, ADDRESS_LEN};
use stashd_primitives::Hash256;

use crate::keys::{IndexKey, INDEX_KEY_LEN};

const FLAG_SPENT: u8 = 1 << 0;

/// One wallet-relevant output, unspent or spent. The raw output bytes are
/// copied out of the file map so the record outlives it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredOutput {
    pub key: IndexKey,
    pub address: ScriptAddress,
    pub value: i64,
    pub parent_tx_hash: Hash256,
    pub raw_output: Vec<u8>,
    pub spent_by: Option<IndexKey>,
}

impl StoredOutput {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(64 + self.raw_output.len());
        let flags = if self.is_spent() { FLAG_SPENT } else { 0 };
        encoder.write_u8(flags);
        encoder.write_i64_le(self.value);
        encoder.write_bytes(&self.address);
        encoder.write_hash_le(&self.parent_tx_hash);
        encoder.write_var_bytes(&self.raw_output);
        if let Some(spent_by) = &self.spent_by {
            encoder.write_bytes(spent_by.as_bytes());
        }
        encoder.into_inner()
    }

    pub fn decode(key: IndexKey, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let flags = decoder.read_u8()?;
        let value = decoder.read_i64_le()?;
        let address: ScriptAddress = decoder.read_fixed::<ADDRESS_LEN>()?;
        let parent_tx_hash = decoder.read_hash_le()?;
        let raw_output = decoder.read_var_bytes()?;
        let spent_by = if flags & FLAG_SPENT != 0 {
            let raw = decoder.read_fixed::<INDEX_KEY_LEN>()?;
            Some(IndexKey::from_slice(&raw).expect("fixed length key"))
        } else {
            None
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            key,
            address,
            value,
            parent_tx_hash,
            raw_output,
            spent_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(spent: bool) -> StoredOutput {
        StoredOutput {
            key: IndexKey::new(12, 0, 1, 2),
            address: [0x07; ADDRESS_LEN],
            value: 50_000,
            parent_tx_hash: [0xaa; 32],
            raw_output: vec![0x10, 0x20, 0x30],
            spent_by: spent.then(|| IndexKey::new(13, 0, 0, 0)),
        }
    }

    #[test]
    fn unspent_roundtrip() {
        let stxo = sample(false);
        let decoded = StoredOutput::decode(stxo.key, &stxo.encode()).expect("decode");
        assert_eq!(decoded, stxo);
        assert!(!decoded.is_spent());
    }

    #[test]
    fn spent_roundtrip_keeps_spender_key() {
        let stxo = sample(true);
        let decoded = StoredOutput::decode(stxo.key, &stxo.encode()).expect("decode");
        assert_eq!(decoded, stxo);
        assert_eq!(decoded.spent_by, Some(IndexKey::new(13, 0, 0, 0)));
    }
}
