//! In-memory view of the header-linked chain.
//!
//! Heights are dense from 0. Sibling blocks at the same height are
//! distinguished by a duplicate id; the canonical sibling carries
//! [`DUP_MAIN`]. The scanner only ever walks canonical records.

use std::collections::HashMap;
use std::fmt;

use stashd_primitives::header::BlockHeader;
use stashd_primitives::Hash256;

/// Duplicate id reserved for the canonical sibling at a height.
pub const DUP_MAIN: u8 = 0;

#[derive(Clone, Debug)]
pub struct HeaderRecord {
    pub header: BlockHeader,
    pub hash: Hash256,
    pub height: u32,
    pub duplicate_id: u8,
    pub fnum: u32,
    pub offset: u64,
    pub num_tx: u32,
    pub block_size: u32,
}

impl HeaderRecord {
    pub fn is_main(&self) -> bool {
        self.duplicate_id == DUP_MAIN
    }
}

#[derive(Debug)]
pub enum ChainError {
    /// A height past the current top was requested.
    Range(u32),
    /// The header's parent is not in the chain.
    UnknownParent(Hash256),
    /// Persisted records do not form a dense canonical chain.
    Corrupt(String),
    /// The chain holds no headers yet.
    Empty,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Range(height) => write!(f, "height {height} is beyond the chain top"),
            ChainError::UnknownParent(hash) => write!(
                f,
                "parent {} is not in the header chain",
                stashd_primitives::hash_to_hex(hash)
            ),
            ChainError::Corrupt(message) => write!(f, "{message}"),
            ChainError::Empty => write!(f, "header chain is empty"),
        }
    }
}

impl std::error::Error for ChainError {}

pub struct HeaderChain {
    genesis_hash: Hash256,
    headers: HashMap<Hash256, HeaderRecord>,
    canonical: Vec<Hash256>,
    dup_counts: HashMap<u32, u8>,
}

impl HeaderChain {
    pub fn new(genesis_hash: Hash256) -> Self {
        Self {
            genesis_hash,
            headers: HashMap::new(),
            canonical: Vec::new(),
            dup_counts: HashMap::new(),
        }
    }

    pub fn genesis_hash(&self) -> &Hash256 {
        &self.genesis_hash
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.headers.contains_key(hash)
    }

    pub fn header_by_hash(&self, hash: &Hash256) -> Option<&HeaderRecord> {
        self.headers.get(hash)
    }

    pub fn header_by_height(&self, height: u32) -> Result<&HeaderRecord, ChainError> {
        let hash = self
            .canonical
            .get(height as usize)
            .ok_or(ChainError::Range(height))?;
        self.headers
            .get(hash)
            .ok_or_else(|| ChainError::Corrupt(format!("missing record at height {height}")))
    }

    pub fn top(&self) -> Result<&HeaderRecord, ChainError> {
        let hash = self.canonical.last().ok_or(ChainError::Empty)?;
        self.headers
            .get(hash)
            .ok_or_else(|| ChainError::Corrupt("missing record at chain top".to_string()))
    }

    pub fn top_height(&self) -> Result<u32, ChainError> {
        self.top().map(|record| record.height)
    }

    /// Link a header read from a block file into the chain.
    ///
    /// The genesis header starts the chain; a header whose parent is the
    /// current top extends it; a header whose parent lies below the top is
    /// recorded as a sibling with a fresh duplicate id. Returns the new
    /// record's hash.
    pub fn add_header(
        &mut self,
        header: BlockHeader,
        fnum: u32,
        offset: u64,
        num_tx: u32,
        block_size: u32,
    ) -> Result<Hash256, ChainError> {
        let hash = header.hash();
        if let Some(existing) = self.headers.get_mut(&hash) {
            // re-read of a known header: refresh its file position
            existing.fnum = fnum;
            existing.offset = offset;
            existing.num_tx = num_tx;
            existing.block_size = block_size;
            return Ok(hash);
        }

        let (height, duplicate_id) = if hash == self.genesis_hash {
            (0, DUP_MAIN)
        } else {
            let parent = self
                .headers
                .get(&header.prev_block)
                .ok_or(ChainError::UnknownParent(header.prev_block))?;
            let height = parent.height + 1;
            if self.canonical.len() as u32 == height && parent.is_main() {
                (height, DUP_MAIN)
            } else {
                let next = self.dup_counts.entry(height).or_insert(DUP_MAIN);
                *next += 1;
                (height, *next)
            }
        };

        let record = HeaderRecord {
            header,
            hash,
            height,
            duplicate_id,
            fnum,
            offset,
            num_tx,
            block_size,
        };

        if duplicate_id == DUP_MAIN {
            debug_assert_eq!(self.canonical.len(), height as usize);
            self.canonical.push(hash);
        }
        self.dup_counts.entry(height).or_insert(DUP_MAIN);
        self.headers.insert(hash, record);
        Ok(hash)
    }

    /// Record where a known header lives on disk. Used during
    /// reconciliation; unknown hashes are ignored.
    pub fn stamp_file_position(&mut self, hash: &Hash256, fnum: u32, offset: u64) {
        if let Some(record) = self.headers.get_mut(hash) {
            record.fnum = fnum;
            record.offset = offset;
        }
    }

    /// Rebuild the chain from persisted records, verifying that canonical
    /// heights are dense from 0.
    pub fn from_records(
        genesis_hash: Hash256,
        records: Vec<HeaderRecord>,
    ) -> Result<Self, ChainError> {
        let mut chain = Self::new(genesis_hash);
        let mut canonical: Vec<Option<Hash256>> = Vec::new();

        for record in records {
            let height = record.height as usize;
            if record.is_main() {
                if canonical.len() <= height {
                    canonical.resize(height + 1, None);
                }
                if canonical[height].is_some() {
                    return Err(ChainError::Corrupt(format!(
                        "two canonical records at height {height}"
                    )));
                }
                canonical[height] = Some(record.hash);
            }
            let next = chain.dup_counts.entry(record.height).or_insert(DUP_MAIN);
            *next = (*next).max(record.duplicate_id);
            chain.headers.insert(record.hash, record);
        }

        for (height, entry) in canonical.iter().enumerate() {
            match entry {
                Some(hash) => chain.canonical.push(*hash),
                None => {
                    return Err(ChainError::Corrupt(format!(
                        "no canonical record at height {height}"
                    )))
                }
            }
        }

        if let Some(first) = chain.canonical.first() {
            if *first != genesis_hash {
                return Err(ChainError::Corrupt(
                    "stored chain does not start at the genesis block".to_string(),
                ));
            }
        }

        Ok(chain)
    }
}
