pub mod headerdb;
pub mod headers;
pub mod params;

pub use headers::{ChainError, HeaderChain, HeaderRecord, DUP_MAIN};
pub use params::{chain_params, ChainParams, Network};
