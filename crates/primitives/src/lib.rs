pub mod encoding;
pub mod hash;
pub mod header;
pub mod outpoint;
pub mod script;

pub type Hash256 = [u8; 32];

/// Render a hash the way block explorers do (byte-reversed hex).
pub fn hash_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
