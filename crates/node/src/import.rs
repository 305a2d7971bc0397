//! Import of raw block files.
//!
//! Each record is the network magic, a little-endian `u32` length and the
//! serialized block. Files may be zero padded past the last record.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ledgerd_chainstate::{Engine, EngineError, SubmitOutcome};
use ledgerd_consensus::constants::MAX_BLOCK_SIZE;
use ledgerd_consensus::params::hash256_to_hex;
use ledgerd_storage::KeyValueStore;
use serde::Serialize;

#[derive(Debug)]
pub enum ImportError {
    Io { path: PathBuf, err: io::Error },
    BadMagic { path: PathBuf, offset: u64 },
    Oversized { path: PathBuf, offset: u64, len: u32 },
    Truncated { path: PathBuf, offset: u64 },
    Engine(EngineError),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Io { path, err } => write!(f, "{}: {err}", path.display()),
            ImportError::BadMagic { path, offset } => {
                write!(f, "{}: bad record magic at offset {offset}", path.display())
            }
            ImportError::Oversized { path, offset, len } => write!(
                f,
                "{}: record at offset {offset} claims {len} bytes",
                path.display()
            ),
            ImportError::Truncated { path, offset } => {
                write!(f, "{}: truncated record at offset {offset}", path.display())
            }
            ImportError::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<EngineError> for ImportError {
    fn from(err: EngineError) -> Self {
        ImportError::Engine(err)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub files: u64,
    pub blocks: u64,
    pub accepted: u64,
    pub already_known: u64,
    pub rejected: u64,
    pub orphaned: u64,
}

impl ImportSummary {
    fn record(&mut self, outcome: &SubmitOutcome) {
        self.blocks += 1;
        match outcome {
            SubmitOutcome::Accepted { .. } => self.accepted += 1,
            SubmitOutcome::AlreadyKnown(_) => self.already_known += 1,
            SubmitOutcome::Rejected(_) | SubmitOutcome::AncestorRejected { .. } => {
                self.rejected += 1
            }
            SubmitOutcome::Orphaned => self.orphaned += 1,
        }
    }
}

pub struct BlockFileReader<R> {
    reader: R,
    path: PathBuf,
    magic: [u8; 4],
    offset: u64,
}

impl BlockFileReader<BufReader<File>> {
    pub fn open(path: &Path, magic: [u8; 4]) -> Result<Self, ImportError> {
        let file = File::open(path).map_err(|err| ImportError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        Ok(Self::new(BufReader::new(file), path, magic))
    }
}

impl<R: Read> BlockFileReader<R> {
    pub fn new(reader: R, path: &Path, magic: [u8; 4]) -> Self {
        Self {
            reader,
            path: path.to_path_buf(),
            magic,
            offset: 0,
        }
    }

    /// The next block's bytes, or `None` at end of data.
    pub fn next_block(&mut self) -> Result<Option<Vec<u8>>, ImportError> {
        let mut prefix = [0u8; 8];
        match self.read_exact_or_eof(&mut prefix)? {
            0 => return Ok(None),
            8 => {}
            _ => {
                if prefix.iter().all(|byte| *byte == 0) {
                    return Ok(None);
                }
                return Err(ImportError::Truncated {
                    path: self.path.clone(),
                    offset: self.offset,
                });
            }
        }
        if prefix.iter().all(|byte| *byte == 0) {
            return Ok(None);
        }
        if prefix[..4] != self.magic {
            return Err(ImportError::BadMagic {
                path: self.path.clone(),
                offset: self.offset,
            });
        }
        let len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        if len == 0 || len > MAX_BLOCK_SIZE {
            return Err(ImportError::Oversized {
                path: self.path.clone(),
                offset: self.offset,
                len,
            });
        }
        let mut block = vec![0u8; len as usize];
        if self.read_exact_or_eof(&mut block)? != block.len() {
            return Err(ImportError::Truncated {
                path: self.path.clone(),
                offset: self.offset,
            });
        }
        self.offset += 8 + u64::from(len);
        Ok(Some(block))
    }

    fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<usize, ImportError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    return Err(ImportError::Io {
                        path: self.path.clone(),
                        err,
                    })
                }
            }
        }
        Ok(filled)
    }
}

/// Expand `paths` into the files to import: directories contribute their
/// `data*.dat` / `blk*.dat` files in name order.
pub fn collect_block_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ImportError> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let entries = fs::read_dir(path).map_err(|err| ImportError::Io {
            path: path.clone(),
            err,
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ImportError::Io {
                path: path.clone(),
                err,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if (name.starts_with("data") || name.starts_with("blk")) && name.ends_with(".dat") {
                found.push(entry.path());
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// Submit every block in `files` in order. Consensus rejections are
/// counted, not fatal; engine failures stop the import.
pub fn import_files<S: KeyValueStore>(
    engine: &Engine<S>,
    files: &[PathBuf],
    magic: [u8; 4],
    shutdown: &AtomicBool,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();
    for path in files {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let start = Instant::now();
        let before = summary.blocks;
        let mut reader = BlockFileReader::open(path, magic)?;
        while let Some(bytes) = reader.next_block()? {
            let outcome = engine.submit_block(&bytes)?;
            match &outcome {
                SubmitOutcome::Rejected(reason) => log_warn!(
                    "import {}: block {} rejected: {reason}",
                    path.display(),
                    summary.blocks
                ),
                SubmitOutcome::AncestorRejected { ancestor, reason } => log_warn!(
                    "import {}: block {} rejected: ancestor {} failed: {reason}",
                    path.display(),
                    summary.blocks,
                    hash256_to_hex(ancestor)
                ),
                _ => {}
            }
            summary.record(&outcome);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
        }
        summary.files += 1;
        log_info!(
            "imported {} ({} blocks in {}ms)",
            path.display(),
            summary.blocks - before,
            start.elapsed().as_millis()
        );
    }
    Ok(summary)
}
