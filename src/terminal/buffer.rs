//! Bounded output buffer and append-only session log

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::types::TerminalId;

// ============================================================================
// Output buffer
// ============================================================================

/// Fixed-capacity byte buffer that keeps the newest output
///
/// Appending past capacity evicts the oldest bytes first. A single chunk
/// larger than the capacity leaves only its tail.
#[derive(Debug)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl OutputBuffer {
    /// Create an empty buffer holding at most `capacity` bytes
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, evicting from the front as needed
    pub fn push(&mut self, chunk: &[u8]) {
        let chunk = if chunk.len() > self.capacity {
            &chunk[chunk.len() - self.capacity..]
        } else {
            chunk
        };
        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(chunk);
    }

    /// Buffered contents as text
    ///
    /// Eviction can cut a multi-byte character in half; stray continuation
    /// bytes at the front are skipped rather than rendered as replacement
    /// characters.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let (front, back) = self.data.as_slices();
        let mut bytes = Vec::with_capacity(self.data.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        let start = bytes
            .iter()
            .take(3)
            .take_while(|b| (**b & 0b1100_0000) == 0b1000_0000)
            .count();
        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }

    /// Bytes currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing has been buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum bytes held
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// Log sink
// ============================================================================

/// Append-only log of everything a terminal printed
///
/// Write failures are logged once and then ignored; losing the log never
/// interrupts the session.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
    failed: bool,
}

impl LogSink {
    /// Create `{dir}/{timestamp}-{id}.log`, creating `dir` if needed
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be created
    pub fn create(dir: &Path, id: &TerminalId) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = dir.join(format!("{stamp}-{id}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            failed: false,
        })
    }

    /// Append raw bytes
    pub fn append(&mut self, chunk: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_all(chunk) {
            if !self.failed {
                log::warn!("Terminal log {} is no longer writable: {}", self.path.display(), e);
            }
            self.failed = true;
        }
    }

    /// Flush and release the file handle
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush()
        {
            log::warn!("Failed to flush terminal log {}: {}", self.path.display(), e);
        }
    }

    /// Location of the log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// Combined sink
// ============================================================================

/// Buffer and log updated together under one lock
#[derive(Debug)]
pub struct SessionOutput {
    /// In-memory tail
    pub buffer: OutputBuffer,
    /// On-disk full history
    pub log: LogSink,
}

impl SessionOutput {
    /// Combine a buffer and a log
    #[must_use]
    pub const fn new(buffer: OutputBuffer, log: LogSink) -> Self {
        Self { buffer, log }
    }

    /// Record one output chunk in both places
    pub fn record(&mut self, chunk: &[u8]) {
        self.buffer.push(chunk);
        self.log.append(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut buf = OutputBuffer::new(8);
        buf.push(b"abcdef");
        buf.push(b"ghij");
        assert_eq!(buf.snapshot(), "cdefghij");
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn oversized_chunk_keeps_tail() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"0123456789");
        assert_eq!(buf.snapshot(), "6789");
    }

    #[test]
    fn snapshot_skips_split_character() {
        let mut buf = OutputBuffer::new(4);
        // "é" is two bytes; eviction leaves its continuation byte at the front
        buf.push("aébc".as_bytes());
        buf.push(b"d");
        assert_eq!(buf.snapshot(), "bcd");
    }
}
