//! Output script classification and script-address derivation.
//!
//! A script address is the 21-byte form the index is keyed by: one network
//! prefix byte followed by a 20-byte hash160.

use crate::hash::hash160;

pub const ADDRESS_LEN: usize = 21;

pub type ScriptAddress = [u8; ADDRESS_LEN];

/// Network prefix bytes for address derivation, threaded through explicitly
/// rather than held in process-wide state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressPrefixes {
    pub pubkey_hash: u8,
    pub script_hash: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Unknown,
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    if is_p2pkh(script) {
        ScriptType::P2Pkh
    } else if is_p2sh(script) {
        ScriptType::P2Sh
    } else if is_p2pk(script) {
        ScriptType::P2Pk
    } else {
        ScriptType::Unknown
    }
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    let key_len = match script.first().copied() {
        Some(len @ 33) => len,
        Some(len @ 65) => len,
        _ => return false,
    };

    let expected_len = key_len as usize + 2;
    script.len() == expected_len && script[script.len() - 1] == OP_CHECKSIG
}

/// Derive the 21-byte script address of an output script, or `None` for
/// non-standard scripts. Pay-to-pubkey outputs normalize to the same address
/// as the matching pay-to-pubkey-hash output.
pub fn script_to_address(script: &[u8], prefixes: &AddressPrefixes) -> Option<ScriptAddress> {
    match classify_script_pubkey(script) {
        ScriptType::P2Pkh => {
            let mut out = [0u8; ADDRESS_LEN];
            out[0] = prefixes.pubkey_hash;
            out[1..].copy_from_slice(&script[3..23]);
            Some(out)
        }
        ScriptType::P2Sh => {
            let mut out = [0u8; ADDRESS_LEN];
            out[0] = prefixes.script_hash;
            out[1..].copy_from_slice(&script[2..22]);
            Some(out)
        }
        ScriptType::P2Pk => {
            let key_len = script[0] as usize;
            let pubkey = &script[1..1 + key_len];
            let mut out = [0u8; ADDRESS_LEN];
            out[0] = prefixes.pubkey_hash;
            out[1..].copy_from_slice(&hash160(pubkey));
            Some(out)
        }
        ScriptType::Unknown => None,
    }
}
