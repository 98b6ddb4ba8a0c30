//! Framed-block scanning and the copy-free ("light") transaction parse.
//!
//! A block file is a concatenation of `magic(4) ∥ size(4 LE) ∥ payload`
//! frames. The payload is an 80-byte header, a CompactSize transaction
//! count, and the transactions in wire format. The light parse records byte
//! ranges into the payload without copying it.

use std::sync::Arc;

use stashd_primitives::encoding::{DecodeError, Decoder};
use stashd_primitives::hash::sha256d;
use stashd_primitives::header::{hash_header_bytes, HEADER_SIZE};
use stashd_primitives::Hash256;

use crate::fileset::BlockFileMap;

/// Smallest byte count that can hold a framed header (frame + header).
pub const MIN_FRAMED_BLOCK: u64 = 8 + HEADER_SIZE as u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FilePosition {
    pub fnum: u32,
    pub offset: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadControl {
    Continue,
    Stop,
}

#[derive(Debug)]
pub enum ParseError {
    Decode(DecodeError),
    BlockCorrupt(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Decode(err) => write!(f, "{err}"),
            ParseError::BlockCorrupt(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<DecodeError> for ParseError {
    fn from(err: DecodeError) -> Self {
        ParseError::Decode(err)
    }
}

/// Forward byte search for the magic tag. Returns the offset of the first
/// match relative to `haystack`.
fn find_magic(haystack: &[u8], magic: &[u8; 4]) -> Option<usize> {
    if haystack.len() < 4 {
        return None;
    }
    (0..=haystack.len() - 4).find(|&i| &haystack[i..i + 4] == magic)
}

/// Walk the framed blocks of one mapped file, calling back with each
/// payload.
///
/// Starts at `start_offset` and does not start a block at or past
/// `stop_before`. On a magic mismatch the walk resyncs by scanning forward
/// for the next tag and logs the recovered offset. A truncated trailing
/// block ends the walk cleanly. The callback can end the walk early by
/// returning [`ReadControl::Stop`]; the returned offset is then the start
/// of the block the callback saw, otherwise the offset just past the last
/// complete block.
pub fn scan_framed_blocks<F>(
    map: &BlockFileMap,
    magic: &[u8; 4],
    start_offset: u64,
    stop_before: u64,
    mut callback: F,
) -> u64
where
    F: FnMut(&[u8], FilePosition, u32) -> ReadControl,
{
    let bytes = map.bytes();
    let file_len = bytes.len() as u64;
    let stop = stop_before.min(file_len);

    if start_offset >= stop {
        return start_offset;
    }

    if bytes.len() >= 4 && &bytes[0..4] != magic {
        stashd_log::log_error!(
            "block file {} is for another network (magic {:02x}{:02x}{:02x}{:02x})",
            map.fnum(),
            bytes[0],
            bytes[1],
            bytes[2],
            bytes[3],
        );
    }

    let mut pos = start_offset;
    while pos < stop {
        if pos + 8 > file_len {
            break;
        }

        let at = pos as usize;
        if &bytes[at..at + 4] != magic {
            // resync: scan forward for the next tag
            match find_magic(&bytes[at..], magic) {
                Some(skip) => {
                    pos += skip as u64;
                    stashd_log::log_error!(
                        "next block header found at offset {pos} in file {}",
                        map.fnum()
                    );
                    continue;
                }
                None => {
                    stashd_log::log_error!("no more blocks found in file {}", map.fnum());
                    break;
                }
            }
        }

        let size_at = at + 4;
        let blk_size = u32::from_le_bytes([
            bytes[size_at],
            bytes[size_at + 1],
            bytes[size_at + 2],
            bytes[size_at + 3],
        ]);
        let payload_start = pos + 8;
        let payload_end = payload_start + blk_size as u64;
        if payload_end > file_len {
            // truncated trailing block; a later rescan picks it up complete
            break;
        }

        let payload = &bytes[payload_start as usize..payload_end as usize];
        let position = FilePosition {
            fnum: map.fnum(),
            offset: pos,
        };
        match callback(payload, position, blk_size) {
            ReadControl::Continue => {}
            ReadControl::Stop => return pos,
        }
        pos = payload_end;
    }

    pos
}

/// Hash of the first framed header in a file, or `None` when the file is
/// too small or carries the wrong magic.
pub fn first_block_hash(map: &BlockFileMap, magic: &[u8; 4]) -> Option<Hash256> {
    let bytes = map.bytes();
    if (bytes.len() as u64) < MIN_FRAMED_BLOCK {
        stashd_log::log_error!(
            "block file {} is less than {MIN_FRAMED_BLOCK} bytes",
            map.fnum()
        );
        return None;
    }
    if &bytes[0..4] != magic {
        stashd_log::log_error!(
            "magic bytes mismatch in file {}; block file is for another network",
            map.fnum()
        );
        return None;
    }
    hash_header_bytes(&bytes[8..8 + HEADER_SIZE])
}

/// Offset just past the first framed block of a file, used for the genesis
/// special case during reconciliation.
pub fn first_block_end(map: &BlockFileMap) -> Option<u64> {
    let bytes = map.bytes();
    if bytes.len() < 8 {
        return None;
    }
    let blk_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let end = 8 + blk_size as u64;
    (end <= bytes.len() as u64).then_some(end)
}

/// A byte range inside a block payload.
pub type TxSpan = (usize, usize);

/// One transaction parsed for offsets only.
#[derive(Clone, Debug)]
pub struct LightTx {
    /// Offset of the transaction inside the block payload.
    pub start: usize,
    pub size: usize,
    /// Input ranges, payload-relative.
    pub inputs: Vec<TxSpan>,
    /// Output ranges, payload-relative.
    pub outputs: Vec<TxSpan>,
}

/// A block materialized for scanning: light transactions over a shared file
/// map. Slices derived from it are bounded by the map's lifetime; nothing is
/// copied until an index record is built.
pub struct BlockData {
    map: Arc<BlockFileMap>,
    payload_offset: u64,
    payload_len: u32,
    pub hash: Hash256,
    pub height: u32,
    pub duplicate_id: u8,
    pub txs: Vec<LightTx>,
}

impl BlockData {
    pub fn parse(
        map: Arc<BlockFileMap>,
        payload_offset: u64,
        payload_len: u32,
        height: u32,
        duplicate_id: u8,
    ) -> Result<Self, ParseError> {
        let start = payload_offset as usize;
        let end = start + payload_len as usize;
        let bytes = map.bytes();
        if end > bytes.len() {
            return Err(ParseError::BlockCorrupt("payload extends past file end"));
        }
        let payload = &bytes[start..end];
        let hash =
            hash_header_bytes(payload).ok_or(ParseError::BlockCorrupt("payload shorter than header"))?;
        let txs = parse_light_txs(payload)?;
        Ok(Self {
            map,
            payload_offset,
            payload_len,
            hash,
            height,
            duplicate_id,
            txs,
        })
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.payload_offset as usize;
        &self.map.bytes()[start..start + self.payload_len as usize]
    }

    pub fn tx_bytes(&self, tx_index: usize) -> &[u8] {
        let tx = &self.txs[tx_index];
        &self.payload()[tx.start..tx.start + tx.size]
    }

    pub fn tx_hash(&self, tx_index: usize) -> Hash256 {
        sha256d(self.tx_bytes(tx_index))
    }

    pub fn span_bytes(&self, span: TxSpan) -> &[u8] {
        &self.payload()[span.0..span.0 + span.1]
    }
}

/// Parse the transaction section of a block payload into offset records.
///
/// The whole payload must be consumed exactly: leftover or missing bytes
/// mean the declared sizes are inconsistent and the block is corrupt.
pub fn parse_light_txs(payload: &[u8]) -> Result<Vec<LightTx>, ParseError> {
    let mut decoder = Decoder::new(payload);
    decoder.skip(HEADER_SIZE)?;
    let num_tx = decoder.read_varint()?;
    let mut txs = Vec::with_capacity(num_tx as usize);

    for _ in 0..num_tx {
        let tx_start = decoder.position();
        decoder.skip(4)?; // version

        let num_inputs = decoder.read_varint()?;
        let mut inputs = Vec::with_capacity(num_inputs as usize);
        for _ in 0..num_inputs {
            let start = decoder.position();
            decoder.skip(36)?; // outpoint
            let script_len = decoder.read_varint()?;
            decoder.skip(script_len as usize)?;
            decoder.skip(4)?; // sequence
            inputs.push((start, decoder.position() - start));
        }

        let num_outputs = decoder.read_varint()?;
        let mut outputs = Vec::with_capacity(num_outputs as usize);
        for _ in 0..num_outputs {
            let start = decoder.position();
            decoder.skip(8)?; // value
            let script_len = decoder.read_varint()?;
            decoder.skip(script_len as usize)?;
            outputs.push((start, decoder.position() - start));
        }

        decoder.skip(4)?; // lock time
        txs.push(LightTx {
            start: tx_start,
            size: decoder.position() - tx_start,
            inputs,
            outputs,
        });
    }

    if !decoder.is_empty() {
        return Err(ParseError::BlockCorrupt(
            "transaction sizes do not add up to the block payload",
        ));
    }
    Ok(txs)
}

/// Read the CompactSize transaction count that follows the header.
pub fn payload_tx_count(payload: &[u8]) -> Result<u64, ParseError> {
    let mut decoder = Decoder::new(payload);
    decoder.skip(HEADER_SIZE)?;
    Ok(decoder.read_varint()?)
}

#[cfg(test)]
mod tests {
    use stashd_primitives::encoding::Encoder;

    use super::*;

    fn dummy_tx(num_inputs: usize, num_outputs: usize, script_len: usize) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u32_le(1); // version
        encoder.write_varint(num_inputs as u64);
        for i in 0..num_inputs {
            encoder.write_bytes(&[i as u8; 32]); // prev hash
            encoder.write_u32_le(i as u32); // prev index
            encoder.write_var_bytes(&vec![0xab; script_len]);
            encoder.write_u32_le(0xffff_ffff); // sequence
        }
        encoder.write_varint(num_outputs as u64);
        for i in 0..num_outputs {
            encoder.write_i64_le(50_000 + i as i64);
            encoder.write_var_bytes(&vec![0xcd; script_len]);
        }
        encoder.write_u32_le(0); // lock time
        encoder.into_inner()
    }

    fn dummy_payload(txs: &[Vec<u8>]) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(&[0u8; HEADER_SIZE]);
        encoder.write_varint(txs.len() as u64);
        for tx in txs {
            encoder.write_bytes(tx);
        }
        encoder.into_inner()
    }

    #[test]
    fn light_parse_records_spans() {
        let tx0 = dummy_tx(1, 2, 25);
        let tx1 = dummy_tx(2, 1, 23);
        let payload = dummy_payload(&[tx0.clone(), tx1.clone()]);

        let txs = parse_light_txs(&payload).expect("parse");
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].inputs.len(), 1);
        assert_eq!(txs[0].outputs.len(), 2);
        assert_eq!(txs[1].inputs.len(), 2);
        assert_eq!(txs[1].outputs.len(), 1);
        assert_eq!(txs[0].size, tx0.len());
        assert_eq!(txs[1].size, tx1.len());
        assert_eq!(txs[1].start, txs[0].start + tx0.len());

        // span sizes: outpoint(36) + varint(1) + script + sequence(4)
        let (_, input_len) = txs[0].inputs[0];
        assert_eq!(input_len, 36 + 1 + 25 + 4);
        // value(8) + varint(1) + script
        let (_, output_len) = txs[0].outputs[0];
        assert_eq!(output_len, 8 + 1 + 25);
    }

    #[test]
    fn inconsistent_sizes_are_corrupt() {
        let tx = dummy_tx(1, 1, 10);
        let mut payload = dummy_payload(&[tx]);
        payload.push(0x00); // trailing garbage inside the declared payload
        assert!(matches!(
            parse_light_txs(&payload),
            Err(ParseError::BlockCorrupt(_))
        ));

        let tx = dummy_tx(1, 1, 10);
        let mut truncated = dummy_payload(&[tx]);
        truncated.pop();
        assert!(parse_light_txs(&truncated).is_err());
    }

    #[test]
    fn find_magic_scans_forward() {
        let magic = [0xf9, 0xbe, 0xb4, 0xd9];
        let mut bytes = vec![0x11u8; 17];
        bytes.extend_from_slice(&magic);
        bytes.extend_from_slice(&[0x22; 3]);
        assert_eq!(find_magic(&bytes, &magic), Some(17));
        assert_eq!(find_magic(&[0u8; 3], &magic), None);
        assert_eq!(find_magic(&[0u8; 40], &magic), None);
    }
}
