//! The canonical index key: `height(3 BE) ∥ dup(1) ∥ txIndex(2 BE) ∥ ioIndex(2 BE)`.
//!
//! The 4-byte `height ∥ dup` prefix (the "hgtx") partitions per-address
//! history; the 6-byte prefix identifies a transaction.

pub const INDEX_KEY_LEN: usize = 8;
pub const TX_KEY_LEN: usize = 6;
pub const HGTX_LEN: usize = 4;

/// Highest height the 3-byte encoding can carry.
pub const MAX_INDEXED_HEIGHT: u32 = 0x00ff_ffff;

pub fn hgtx(height: u32, duplicate_id: u8) -> [u8; HGTX_LEN] {
    debug_assert!(height <= MAX_INDEXED_HEIGHT);
    let be = height.to_be_bytes();
    [be[1], be[2], be[3], duplicate_id]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct IndexKey([u8; INDEX_KEY_LEN]);

impl IndexKey {
    pub fn new(height: u32, duplicate_id: u8, tx_index: u16, io_index: u16) -> Self {
        let mut out = [0u8; INDEX_KEY_LEN];
        out[0..4].copy_from_slice(&hgtx(height, duplicate_id));
        out[4..6].copy_from_slice(&tx_index.to_be_bytes());
        out[6..8].copy_from_slice(&io_index.to_be_bytes());
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != INDEX_KEY_LEN {
            return None;
        }
        let mut out = [0u8; INDEX_KEY_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; INDEX_KEY_LEN] {
        &self.0
    }

    pub fn height(&self) -> u32 {
        u32::from_be_bytes([0, self.0[0], self.0[1], self.0[2]])
    }

    pub fn duplicate_id(&self) -> u8 {
        self.0[3]
    }

    pub fn tx_index(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    pub fn io_index(&self) -> u16 {
        u16::from_be_bytes([self.0[6], self.0[7]])
    }

    pub fn hgtx(&self) -> [u8; HGTX_LEN] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    /// The 6-byte key of the transaction this input or output belongs to.
    pub fn tx_key(&self) -> TxKey {
        let mut out = [0u8; TX_KEY_LEN];
        out.copy_from_slice(&self.0[..TX_KEY_LEN]);
        TxKey(out)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TxKey([u8; TX_KEY_LEN]);

impl TxKey {
    pub fn new(height: u32, duplicate_id: u8, tx_index: u16) -> Self {
        let mut out = [0u8; TX_KEY_LEN];
        out[0..4].copy_from_slice(&hgtx(height, duplicate_id));
        out[4..6].copy_from_slice(&tx_index.to_be_bytes());
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != TX_KEY_LEN {
            return None;
        }
        let mut out = [0u8; TX_KEY_LEN];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; TX_KEY_LEN] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_packs_fields_big_endian() {
        let key = IndexKey::new(0x0102_03, 0x04, 0x0506, 0x0708);
        assert_eq!(key.as_bytes(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(key.height(), 0x0102_03);
        assert_eq!(key.duplicate_id(), 0x04);
        assert_eq!(key.tx_index(), 0x0506);
        assert_eq!(key.io_index(), 0x0708);
        assert_eq!(key.tx_key(), TxKey::new(0x0102_03, 0x04, 0x0506));
    }

    #[test]
    fn keys_sort_by_height_then_position() {
        let a = IndexKey::new(5, 0, 0, 1);
        let b = IndexKey::new(5, 0, 1, 0);
        let c = IndexKey::new(6, 0, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }
}
