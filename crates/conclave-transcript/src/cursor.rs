//! Tailing cursor — turns a growing append-only file into a lazy,
//! restartable sequence of parsed records.
//!
//! Each cursor owns nothing but a byte offset; it opens a fresh read-only
//! handle on every tick, so no file descriptor is ever shared between
//! tasks. Writers publish whole `\n`-terminated lines, which makes a
//! half-written record invisible: the trailing partial line is simply
//! reconsidered on the next tick once its newline lands.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use conclave_core::types::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::decode_line;
use crate::error::TranscriptError;

pub struct TailCursor {
    path: PathBuf,
    offset: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl TailCursor {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            poll_interval,
            cancel,
        }
    }

    /// Skip everything already in the file: position the cursor at the
    /// current length, so only records appended afterwards are delivered.
    /// Used when resuming a live session, where the history was already
    /// reacted to and displayed. A missing file leaves the cursor at 0.
    pub fn resume_at_end(mut self) -> Self {
        self.offset = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes already delivered. Recording this and feeding it to
    /// [`set_position`](Self::set_position) on a fresh cursor resumes the
    /// exact same suffix.
    pub fn position(&self) -> u64 {
        self.offset
    }

    pub fn set_position(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// One read cycle: stat, detect truncation, deliver every complete
    /// line past the offset.
    ///
    /// A file that does not exist yet reads as empty (bootstrap); a file
    /// smaller than the offset was truncated or rotated and resets the
    /// cursor to 0. Lines that fail to decode advance the offset but
    /// yield no record. The trailing partial line never advances it.
    pub fn poll_once(&mut self) -> Result<Vec<Message>, TranscriptError> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if size < self.offset {
            debug!(
                path = %self.path.display(),
                old_offset = self.offset,
                size,
                "transcript shrank; resetting cursor to start"
            );
            self.offset = 0;
        }
        if size == self.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((size - self.offset) as usize);
        file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut consumed = 0usize;
        for chunk in buf.split_inclusive(|&b| b == b'\n') {
            if chunk.last() != Some(&b'\n') {
                break;
            }
            consumed += chunk.len();
            let line = String::from_utf8_lossy(chunk);
            match decode_line(&line) {
                Ok(msg) => records.push(msg),
                Err(e) => trace!(error = %e, "skipping malformed transcript line"),
            }
        }
        self.offset += consumed as u64;
        Ok(records)
    }

    /// Tick loop: poll, forward every record through the bounded channel,
    /// sleep. Returns when cancelled or when the receiver goes away.
    ///
    /// Read errors are logged and retried on the next tick; a send that
    /// has to wait (backpressure from a busy consumer) is interruptible
    /// by cancellation without losing transcript state — the record was
    /// already past the offset, and shutdown discards in-flight work.
    pub async fn run(mut self, tx: mpsc::Sender<Message>) {
        loop {
            match self.poll_once() {
                Ok(records) => {
                    for record in records {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            sent = tx.send(record) => {
                                if sent.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "transcript read failed; retrying");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptWriter;

    fn cursor(path: &Path) -> TailCursor {
        TailCursor::new(path, Duration::from_millis(10), CancellationToken::new())
    }

    #[test]
    fn delivers_appended_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discussion.jsonl");
        let mut writer = TranscriptWriter::open(&path).unwrap();
        writer.append(&Message::user("r1")).unwrap();
        writer.append(&Message::user("r2")).unwrap();

        let mut cur = cursor(&path);
        let records = cur.poll_once().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "r1");
        assert_eq!(records[1].content, "r2");

        // nothing new, nothing delivered twice
        assert!(cur.poll_once().unwrap().is_empty());
    }

    #[test]
    fn missing_file_reads_empty_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discussion.jsonl");

        let mut cur = cursor(&path);
        assert!(cur.poll_once().unwrap().is_empty());

        TranscriptWriter::open(&path)
            .unwrap()
            .append(&Message::user("first"))
            .unwrap();
        assert_eq!(cur.poll_once().unwrap().len(), 1);
    }

    #[test]
    fn resume_at_end_skips_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discussion.jsonl");
        let mut writer = TranscriptWriter::open(&path).unwrap();
        writer.append(&Message::user("answered last session")).unwrap();
        writer.append(&Message::user("also old")).unwrap();

        let mut cur = cursor(&path).resume_at_end();
        assert!(cur.poll_once().unwrap().is_empty());

        writer.append(&Message::user("new turn")).unwrap();
        let records = cur.poll_once().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "new turn");
    }

    #[test]
    fn resume_at_end_on_missing_file_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discussion.jsonl");

        let mut cur = cursor(&path).resume_at_end();
        assert_eq!(cur.position(), 0);

        TranscriptWriter::open(&path)
            .unwrap()
            .append(&Message::user("first"))
            .unwrap();
        assert_eq!(cur.poll_once().unwrap().len(), 1);
    }

    #[test]
    fn truncation_resets_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("discussion.jsonl");
        let mut writer = TranscriptWriter::open(&path).unwrap();
        writer.append(&Message::user("old1")).unwrap();
        writer.append(&Message::user("old2")).unwrap();

        let mut cur = cursor(&path);
        assert_eq!(cur.poll_once().unwrap().len(), 2);

        drop(writer);
        fs::write(&path, b"").unwrap();
        let mut writer = TranscriptWriter::open(&path).unwrap();
        writer.append(&Message::user("fresh")).unwrap();

        let records = cur.poll_once().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "fresh");
    }
}
