//! Output Sink — line/byte-bounded streaming capture with spill-to-file.
//!
//! A write-only sink that accepts arbitrary UTF-8 chunks from a streaming
//! sub-agent process and produces, on [`OutputSink::dump`], an
//! [`OutputSummary`]. The in-memory tail never exceeds the configured
//! threshold; everything written is also tee'd to a spill file once the
//! threshold is first exceeded, so the full output remains recoverable as
//! an `agent://<id>` artifact even when the preview is truncated.

use std::fs::File;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

/// Default in-memory/preview threshold: 50 KiB.
pub const DEFAULT_SPILL_THRESHOLD: usize = 50 * 1024;

/// Accumulated result of a completed (or in-progress) output capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputSummary {
    /// The retained tail, valid UTF-8, optionally prefixed with a notice.
    pub output: String,
    /// `true` iff `total_bytes` exceeded the configured threshold.
    pub truncated: bool,
    /// Total newline-terminated lines seen across the sink's lifetime.
    pub total_lines: u64,
    /// Total bytes written across the sink's lifetime.
    pub total_bytes: u64,
    /// Lines present in the retained `output` string.
    pub output_lines: u64,
    /// Bytes present in the retained `output` string.
    pub output_bytes: u64,
    /// The `agent://<id>` artifact id, set once a spill file has been
    /// created.
    pub artifact_id: Option<String>,
}

/// A write-only, UTF-8-safe, byte-bounded output sink.
pub struct OutputSink {
    threshold: usize,
    buffer: Vec<u8>,
    total_bytes: u64,
    total_lines: u64,
    spill_path: PathBuf,
    spill_file: Option<File>,
    artifact_id: String,
}

impl OutputSink {
    /// Create a new sink. `spill_path` is where the full output is written
    /// once the in-memory threshold is exceeded; it is created lazily, only
    /// if spilling actually occurs. `artifact_id` becomes the sink's
    /// `agent://<id>` identity once it has spilled.
    #[must_use]
    pub fn new(threshold: usize, spill_path: PathBuf, artifact_id: impl Into<String>) -> Self {
        Self {
            threshold,
            buffer: Vec::new(),
            total_bytes: 0,
            total_lines: 0,
            spill_path,
            spill_file: None,
            artifact_id: artifact_id.into(),
        }
    }

    /// Create a sink using [`DEFAULT_SPILL_THRESHOLD`].
    #[must_use]
    pub fn with_default_threshold(spill_path: PathBuf, artifact_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_SPILL_THRESHOLD, spill_path, artifact_id)
    }

    /// Whether this sink has spilled to disk.
    #[must_use]
    pub const fn is_spilling(&self) -> bool {
        // spill_file is only populated once spilling has begun.
        matches!(self.spill_file, Some(_))
    }

    /// Append a chunk of output. Chunks need not be aligned to UTF-8
    /// boundaries individually, but the cumulative stream must be valid
    /// UTF-8 (sub-agent stdout/stderr streams satisfy this).
    ///
    /// # Errors
    /// Returns an error only if writing to the spill file fails.
    pub fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        self.total_bytes += chunk.len() as u64;
        self.total_lines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;

        let would_exceed = self.buffer.len() + chunk.len() > self.threshold;
        if self.is_spilling() || would_exceed {
            self.ensure_spill_file()?;
            if let Some(f) = self.spill_file.as_mut() {
                f.write_all(chunk)?;
            }
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.threshold {
            let start = tail_boundary(&self.buffer, self.threshold);
            self.buffer.drain(0..start);
        }

        Ok(())
    }

    fn ensure_spill_file(&mut self) -> io::Result<()> {
        if self.spill_file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.spill_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = File::create(&self.spill_path)?;
        if !self.buffer.is_empty() {
            f.write_all(&self.buffer)?;
        }
        self.spill_file = Some(f);
        Ok(())
    }

    /// Finalize the capture, returning a summary. `notice`, if given, is
    /// prepended to the retained output as its own line. Safe to call more
    /// than once; each call returns the current state (idempotent once the
    /// sink has no further writes).
    #[must_use]
    pub fn dump(&self, notice: Option<&str>) -> OutputSummary {
        let tail = String::from_utf8_lossy(&self.buffer).into_owned();
        let output = match notice {
            Some(n) if !n.is_empty() => format!("{n}\n{tail}"),
            _ => tail,
        };
        let truncated = self.total_bytes > self.threshold as u64;

        OutputSummary {
            output_lines: output.bytes().filter(|&b| b == b'\n').count() as u64,
            output_bytes: output.len() as u64,
            output,
            truncated,
            total_lines: self.total_lines,
            total_bytes: self.total_bytes,
            artifact_id: self.is_spilling().then(|| format!("agent://{}", self.artifact_id)),
        }
    }

    /// Path the sink would spill to (whether or not it has yet).
    #[must_use]
    pub fn spill_path(&self) -> &Path {
        &self.spill_path
    }
}

/// Find the largest `start` such that `buf[start..]` is at most `max` bytes
/// and `start` does not split a UTF-8 multi-byte sequence.
///
/// Walks backward from `buf.len() - max` past any UTF-8 continuation bytes
/// (`0b10xxxxxx`) so the returned boundary always lands on a character
/// start.
fn tail_boundary(buf: &[u8], max: usize) -> usize {
    if buf.len() <= max {
        return 0;
    }
    let mut start = buf.len() - max;
    while start > 0 && buf[start] & 0b1100_0000 == 0b1000_0000 {
        start -= 1;
    }
    start
}
