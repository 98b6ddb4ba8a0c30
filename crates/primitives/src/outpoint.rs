//! Transaction outpoint: the output a transaction input consumes.

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    /// Coinbase inputs carry the null outpoint: an all-zero hash and an
    /// all-ones index.
    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash_le(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash_le()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}

#[cfg(test)]
mod tests {
    use crate::encoding::{decode, encode};

    use super::*;

    #[test]
    fn outpoint_roundtrip() {
        let outpoint = OutPoint {
            hash: [0x4d; 32],
            index: 3,
        };
        let bytes = encode(&outpoint);
        assert_eq!(bytes.len(), 36);
        assert_eq!(decode::<OutPoint>(&bytes).expect("decode"), outpoint);
        assert!(!outpoint.is_null());
    }

    #[test]
    fn null_outpoint_marks_coinbase() {
        let null = OutPoint::null();
        assert!(null.is_null());
        let decoded = decode::<OutPoint>(&encode(&null)).expect("decode");
        assert!(decoded.is_null());
    }
}
