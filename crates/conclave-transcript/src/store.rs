use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use conclave_core::types::Message;
use tracing::trace;

use crate::codec::{decode_line, encode_line};
use crate::error::TranscriptError;

/// Name of the authoritative transcript inside a session directory.
pub const DISCUSSION_FILE: &str = "discussion.jsonl";

/// The write end of an append-only JSONL file.
///
/// Used for `discussion.jsonl` (where it is owned exclusively by the
/// broadcaster drain task) and for the advisory per-participant mirrors.
/// Each record is buffered as one complete line in memory and lands in a
/// single `write_all`, so readers never observe a partially-written record
/// boundary other than a missing trailing `\n`.
pub struct TranscriptWriter {
    path: PathBuf,
    file: File,
}

impl TranscriptWriter {
    /// Open (or create) the file in append mode, restricted to the owning
    /// user.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TranscriptError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let file = opts.open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: encode, one write, one flush.
    pub fn append(&mut self, msg: &Message) -> Result<(), TranscriptError> {
        let line = encode_line(msg)?;
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Bulk-read every complete record from position 0.
///
/// Malformed lines are skipped (forward compatibility), a trailing line
/// without its `\n` is not a record yet, and a missing file reads as empty.
pub fn read_transcript(path: &Path) -> Result<Vec<Message>, TranscriptError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for chunk in bytes.split_inclusive(|&b| b == b'\n') {
        if chunk.last() != Some(&b'\n') {
            break;
        }
        let line = String::from_utf8_lossy(chunk);
        match decode_line(&line) {
            Ok(msg) => records.push(msg),
            Err(e) => trace!(error = %e, "skipping malformed transcript line"),
        }
    }
    Ok(records)
}
