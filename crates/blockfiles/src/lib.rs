pub mod fileset;
pub mod ingest;
pub mod parse;
pub mod reconcile;

pub use fileset::{BlockFileMap, BlockFileSet, FileSetError};
pub use ingest::{ingest_headers, IngestError};
pub use parse::{BlockData, FilePosition, LightTx, ParseError, ReadControl};
pub use reconcile::{find_first_unrecognized_header, Reconciliation};
