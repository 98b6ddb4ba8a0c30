//! Discovery and memory-mapping of the numbered block container files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

const MAX_BLOCK_FILES: u32 = u16::MAX as u32;

#[derive(Debug)]
pub enum FileSetError {
    /// The configured directory holds no `blk00000.dat`.
    NoFirstFile(PathBuf),
    /// More block files than the format allows.
    TooManyFiles,
    /// A file number past the discovered set was requested.
    OutOfRange(u32),
    Io(std::io::Error),
}

impl std::fmt::Display for FileSetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSetError::NoFirstFile(dir) => {
                write!(f, "no blk00000.dat under {}", dir.display())
            }
            FileSetError::TooManyFiles => write!(f, "too many block files"),
            FileSetError::OutOfRange(fnum) => write!(f, "block file {fnum} out of range"),
            FileSetError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for FileSetError {}

impl From<std::io::Error> for FileSetError {
    fn from(err: std::io::Error) -> Self {
        FileSetError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct BlkFile {
    pub fnum: u32,
    pub path: PathBuf,
    pub filesize: u64,
    pub filesize_cumul: u64,
}

pub fn blk_file_path(dir: &Path, fnum: u32) -> PathBuf {
    dir.join(format!("blk{fnum:05}.dat"))
}

/// The set of `blkNNNNN.dat` files under one directory.
///
/// Numbering is dense from 0; discovery stops at the first missing index.
/// The last file may still grow, so rediscovery drops it from the cached set
/// and re-stats it.
pub struct BlockFileSet {
    dir: PathBuf,
    files: Vec<BlkFile>,
    total_bytes: u64,
}

impl BlockFileSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            total_bytes: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn discover(&mut self) -> Result<(), FileSetError> {
        let mut fnum = self.files.len() as u32;
        if let Some(last) = self.files.pop() {
            fnum -= 1;
            self.total_bytes -= last.filesize;
        }

        while fnum < MAX_BLOCK_FILES {
            let path = blk_file_path(&self.dir, fnum);
            let filesize = match std::fs::metadata(&path) {
                Ok(metadata) => metadata.len(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
                Err(err) => return Err(err.into()),
            };

            self.files.push(BlkFile {
                fnum,
                path,
                filesize,
                filesize_cumul: self.total_bytes,
            });
            self.total_bytes += filesize;
            fnum += 1;
        }

        if fnum >= MAX_BLOCK_FILES {
            return Err(FileSetError::TooManyFiles);
        }
        if self.files.is_empty() {
            return Err(FileSetError::NoFirstFile(self.dir.clone()));
        }
        Ok(())
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn file(&self, fnum: u32) -> Option<&BlkFile> {
        self.files.get(fnum as usize)
    }

    /// Absolute chain-byte position of the start of a file.
    pub fn offset_at_start_of_file(&self, fnum: u32) -> Result<u64, FileSetError> {
        if fnum == 0 {
            return Ok(0);
        }
        self.files
            .get(fnum as usize)
            .map(|file| file.filesize_cumul)
            .ok_or(FileSetError::OutOfRange(fnum))
    }

    /// Map a file read-only. The map is released when the last `Arc` clone
    /// drops; records that must outlive it copy their payload first.
    pub fn open(&self, fnum: u32) -> Result<Arc<BlockFileMap>, FileSetError> {
        let file = self
            .files
            .get(fnum as usize)
            .ok_or(FileSetError::OutOfRange(fnum))?;
        BlockFileMap::open(file).map(Arc::new)
    }
}

pub struct BlockFileMap {
    fnum: u32,
    backing: MapBacking,
}

enum MapBacking {
    Mapped(Mmap),
    Empty,
}

impl BlockFileMap {
    fn open(file: &BlkFile) -> Result<Self, FileSetError> {
        if file.filesize == 0 {
            return Ok(Self {
                fnum: file.fnum,
                backing: MapBacking::Empty,
            });
        }
        let handle = File::open(&file.path)?;
        // Safety: the map is read-only and block files are append-only; all
        // earlier files are immutable once observed.
        let mmap = unsafe { Mmap::map(&handle)? };
        Ok(Self {
            fnum: file.fnum,
            backing: MapBacking::Mapped(mmap),
        })
    }

    pub fn fnum(&self) -> u32 {
        self.fnum
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.backing {
            MapBacking::Mapped(mmap) => mmap,
            MapBacking::Empty => &[],
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}
