//! Network parameter definitions.

use stashd_primitives::script::AddressPrefixes;
use stashd_primitives::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl Network {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Some(Self::Main),
            "test" | "testnet" => Some(Self::Test),
            "regtest" => Some(Self::Regtest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Test => "test",
            Self::Regtest => "regtest",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    pub magic_bytes: [u8; 4],
    pub genesis_block_hash: Hash256,
    pub genesis_tx_hash: Hash256,
    pub address_prefixes: AddressPrefixes,
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Main => main_chain_params(),
        Network::Test => test_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

fn main_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Main,
        magic_bytes: [0xf9, 0xbe, 0xb4, 0xd9],
        genesis_block_hash: hash256_from_hex(
            "6fe28c0ab6f1b372c1a6a246ae63f74f931e8365e15a089c68d6190000000000",
        )
        .expect("main genesis hash"),
        genesis_tx_hash: hash256_from_hex(
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a",
        )
        .expect("main genesis tx hash"),
        address_prefixes: AddressPrefixes {
            pubkey_hash: 0x00,
            script_hash: 0x05,
        },
    }
}

fn test_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Test,
        magic_bytes: [0x0b, 0x11, 0x09, 0x07],
        genesis_block_hash: hash256_from_hex(
            "43497fd7f826957108f4a30fd9cec3aeba79972084e90ead01ea330900000000",
        )
        .expect("test genesis hash"),
        genesis_tx_hash: hash256_from_hex(
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a",
        )
        .expect("test genesis tx hash"),
        address_prefixes: AddressPrefixes {
            pubkey_hash: 0x6f,
            script_hash: 0xc4,
        },
    }
}

fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        magic_bytes: [0xfa, 0xbf, 0xb5, 0xda],
        genesis_block_hash: hash256_from_hex(
            "06226e46111a0b59caaf126043eb5bbf28c34f3a5e332a1fc7b2b73cf188910f",
        )
        .expect("regtest genesis hash"),
        genesis_tx_hash: hash256_from_hex(
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a",
        )
        .expect("regtest genesis tx hash"),
        address_prefixes: AddressPrefixes {
            pubkey_hash: 0x6f,
            script_hash: 0xc4,
        },
    }
}

#[derive(Debug)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let hex = input.trim();
    if hex.len() != 64 {
        return Err(HexError::InvalidLength);
    }

    let mut out = [0u8; 32];
    let bytes = hex.as_bytes();
    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let high = hex_digit(chunk[0]).ok_or(HexError::InvalidHex)?;
        let low = hex_digit(chunk[1]).ok_or(HexError::InvalidHex)?;
        out[i] = (high << 4) | low;
    }
    Ok(out)
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
