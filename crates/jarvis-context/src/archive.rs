//! Durable archival of evicted turns
//!
//! Evicted turns are appended as newline-delimited JSON records
//! (`{"prompt": .., "completion": ..}`) so they can be reused as few-shot
//! seed data. The same format is read back by [`read_archive`].

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MemoryError, MemoryResult};
use crate::turn::Turn;

/// One archived exchange. Unknown fields are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub prompt: String,
    pub completion: String,
}

impl From<&Turn> for ArchiveRecord {
    fn from(turn: &Turn) -> Self {
        Self {
            prompt: turn.question().to_string(),
            completion: turn.answer().to_string(),
        }
    }
}

/// Destination for evicted turns.
///
/// An `Err` means the turn was not stored; callers must keep the turn.
pub trait ArchiveSink: Send {
    fn archive(&mut self, turn: &Turn) -> MemoryResult<()>;
}

/// Append-only JSONL archive, one file per user.
#[derive(Debug, Clone)]
pub struct JsonlArchive {
    path: PathBuf,
}

impl JsonlArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/training_<user_id>.jsonl`
    pub fn for_user(dir: &Path, user_id: &str) -> Self {
        Self::new(Self::user_path(dir, user_id))
    }

    pub fn user_path(dir: &Path, user_id: &str) -> PathBuf {
        dir.join(format!("training_{user_id}.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: std::io::Error) -> MemoryError {
        MemoryError::ArchiveWrite {
            path: self.path.clone(),
            source,
        }
    }
}

impl ArchiveSink for JsonlArchive {
    fn archive(&mut self, turn: &Turn) -> MemoryResult<()> {
        let mut line = serde_json::to_string(&ArchiveRecord::from(turn))?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }

        let created = !self.path.exists();
        // Append mode never truncates what an earlier process wrote.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_error(e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.write_error(e))?;

        if created {
            info!(path = %self.path.display(), "created archive file");
        }
        debug!(path = %self.path.display(), bytes = line.len(), "archived turn");
        Ok(())
    }
}

/// In-process archive. Clones share the same record list.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    records: Arc<Mutex<Vec<ArchiveRecord>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ArchiveSink for MemoryArchive {
    fn archive(&mut self, turn: &Turn) -> MemoryResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ArchiveRecord::from(turn));
        Ok(())
    }
}

/// Streaming reader over an archive or seed file.
///
/// Yields one record per non-blank line; a malformed line yields
/// [`MemoryError::Parse`] carrying its 1-based line number.
pub struct ArchiveReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl Iterator for ArchiveReader {
    type Item = MemoryResult<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(MemoryError::ArchiveRead {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }

            let line_no = self.line_no;
            return Some(
                serde_json::from_str(&line)
                    .map_err(|source| MemoryError::Parse { line: line_no, source }),
            );
        }
    }
}

/// Opens an archive for streaming. A missing file is `Ok(None)`.
pub fn read_archive(path: &Path) -> MemoryResult<Option<ArchiveReader>> {
    match File::open(path) {
        Ok(file) => Ok(Some(ArchiveReader {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(MemoryError::ArchiveRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}
