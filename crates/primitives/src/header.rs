//! The 80-byte block header.

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::sha256d;
use crate::Hash256;

pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> [u8; HEADER_SIZE] {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        let bytes = encoder.into_inner();
        bytes.try_into().expect("header encoding length")
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut decoder = Decoder::new(&bytes[..HEADER_SIZE]);
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }
}

/// Hash the raw 80 header bytes without decoding them first.
pub fn hash_header_bytes(bytes: &[u8]) -> Option<Hash256> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    Some(sha256d(&bytes[..HEADER_SIZE]))
}
