//! Reconciling block-file contents with the persisted header view.
//!
//! Finds the first byte position whose block the header database does not
//! know, so scanning can resume there. Corruption never raises: the outcome
//! degrades to a rescan-from-zero signal.

use stashd_chain::HeaderChain;
use stashd_primitives::header::hash_header_bytes;
use stashd_primitives::{hash_to_hex, Hash256};

use crate::fileset::{BlockFileSet, FileSetError};
use crate::parse::{first_block_end, first_block_hash, scan_framed_blocks, FilePosition, ReadControl};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    /// Resume scanning at this file position.
    Resume(FilePosition),
    /// The header database is inconsistent with the files; restart from
    /// file 0.
    RescanFromZero { reason: &'static str },
}

/// Locate the first file position whose block is not in the header chain.
///
/// Walks files in ascending order probing only each file's first header,
/// then linearly walks the boundary file, stamping recognized headers with
/// their file positions and watching for the chain top. If the top hash
/// never shows up, the files are searched newest to oldest for it; a miss
/// means the header database cannot be trusted.
pub fn find_first_unrecognized_header(
    files: &BlockFileSet,
    magic: &[u8; 4],
    chain: &mut HeaderChain,
) -> Result<Reconciliation, FileSetError> {
    if chain.is_empty() {
        return Ok(Reconciliation::Resume(FilePosition { fnum: 0, offset: 0 }));
    }
    let top_hash = match chain.top() {
        Ok(record) => record.hash,
        Err(_) => {
            return Ok(Reconciliation::RescanFromZero {
                reason: "header chain has no top",
            })
        }
    };

    let num_files = files.num_files() as u32;
    let mut index = 0;
    while index < num_files {
        let map = files.open(index)?;
        let recognized = match first_block_hash(&map, magic) {
            Some(hash) => chain.contains(&hash),
            None => false,
        };
        if !recognized {
            break;
        }
        index += 1;
    }

    if index == 0 {
        return Ok(Reconciliation::Resume(FilePosition { fnum: 0, offset: 0 }));
    }
    let boundary = index - 1;

    let (position, found_top, stopped_early) =
        walk_known_headers(files, magic, chain, boundary, &top_hash)?;

    // The genesis header is always present in the chain view even before any
    // scan, so a walk that only recognized the first block of file 0 must
    // restart from the very beginning.
    if position.fnum == 0 {
        let map = files.open(0)?;
        if first_block_end(&map) == Some(position.offset) {
            return Ok(Reconciliation::Resume(FilePosition { fnum: 0, offset: 0 }));
        }
    }

    if !found_top {
        stashd_log::log_warn!(
            "couldn't find top block hash {} in last seen blk file, searching further down the chain",
            hash_to_hex(&top_hash)
        );

        let mut located = false;
        for fnum in (0..num_files).rev() {
            let map = files.open(fnum)?;
            scan_framed_blocks(&map, magic, 0, u64::MAX, |payload, _pos, _size| {
                if hash_header_bytes(payload) == Some(top_hash) {
                    located = true;
                    ReadControl::Stop
                } else {
                    ReadControl::Continue
                }
            });
            if located {
                break;
            }
        }

        if !located {
            stashd_log::log_error!(
                "failed to find last known top block hash in blk files, rescanning all headers"
            );
            return Ok(Reconciliation::RescanFromZero {
                reason: "top header missing from block files",
            });
        }

        // the top exists further down the files, yet the boundary file
        // stopped at a header the database does not know: headers are
        // missing in between
        if stopped_early {
            stashd_log::log_warn!("inconsistent headers db, attempting repairs");
            return Ok(Reconciliation::RescanFromZero {
                reason: "headers missing from the database",
            });
        }
    }

    Ok(Reconciliation::Resume(position))
}

/// Linearly walk one file, stamping every recognized header with its file
/// position. Returns the position of the first unrecognized header (or the
/// end of the file), whether the chain top was seen, and whether the walk
/// stopped early at an unknown header.
fn walk_known_headers(
    files: &BlockFileSet,
    magic: &[u8; 4],
    chain: &mut HeaderChain,
    fnum: u32,
    top_hash: &Hash256,
) -> Result<(FilePosition, bool, bool), FileSetError> {
    let map = files.open(fnum)?;
    let mut found_top = false;
    let mut stopped_at: Option<u64> = None;

    let end = scan_framed_blocks(&map, magic, 0, u64::MAX, |payload, pos, _size| {
        match hash_header_bytes(payload) {
            Some(hash) if chain.contains(&hash) => {
                chain.stamp_file_position(&hash, pos.fnum, pos.offset);
                if hash == *top_hash {
                    found_top = true;
                }
                ReadControl::Continue
            }
            _ => {
                stopped_at = Some(pos.offset);
                ReadControl::Stop
            }
        }
    });

    let stopped_early = stopped_at.is_some();
    let position = FilePosition {
        fnum,
        offset: stopped_at.unwrap_or(end),
    };
    Ok((position, found_top, stopped_early))
}
