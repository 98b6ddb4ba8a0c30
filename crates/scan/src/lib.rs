pub mod batch;
pub mod commit;
pub mod filter;
pub mod keys;
pub mod pipeline;
pub mod progress;
pub mod reset;
pub mod sdbi;
pub mod ssh;
pub mod stxo;
pub mod subssh;
pub mod txhints;

pub use commit::{top_scanned_hash, IndexCommitter};
pub use filter::{AddressFilter, SharedAddressFilter, StaticAddressFilter};
pub use keys::{IndexKey, TxKey};
pub use pipeline::{ScanConfig, ScanError, ScanPipeline, ScanSummary};
pub use progress::{NullProgressSink, ProgressSink, ScanPhase};
pub use reset::InitMode;
pub use stxo::StoredOutput;

/// How much the database resolves beyond wallet history.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DbType {
    /// Wallet history only; no tx-hash hints.
    Bare,
    /// Wallet history plus hints resolving relevant tx hashes.
    Full,
    /// Whole-chain history. Not implemented.
    Super,
}

impl DbType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "DB_BARE" | "bare" => Some(Self::Bare),
            "DB_FULL" | "full" => Some(Self::Full),
            "DB_SUPER" | "super" => Some(Self::Super),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Bare => 0,
            Self::Full => 1,
            Self::Super => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Bare),
            1 => Some(Self::Full),
            2 => Some(Self::Super),
            _ => None,
        }
    }
}
