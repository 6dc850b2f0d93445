//! Run-artifact writers (spec.md §6: JSONL append-only, UTF-8; JSON
//! pretty-printed with a trailing newline).
//!
//! Grounded on `telemetry/writer.rs`'s single-writer-task pattern, adapted
//! from CSV to JSON since spec.md's artifact set is JSONL/JSON throughout,
//! not CSV.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

/// Write one JSON object per line. Creates (or truncates) the file.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row).expect("row must serialize");
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()
}

/// Write a single pretty-printed JSON value with a trailing newline.
pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    let text = serde_json::to_string_pretty(value).expect("value must serialize");
    w.write_all(text.as_bytes())?;
    w.write_all(b"\n")?;
    w.flush()
}

/// A line-buffered JSONL appender held open for the duration of a run —
/// used by the tape recorder and shadow runner to tee raw/normalized
/// frames as they arrive, rather than buffering the whole run in memory.
pub struct JsonlAppender {
    writer: BufWriter<File>,
}

impl JsonlAppender {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append<T: Serialize>(&mut self, row: &T) -> std::io::Result<()> {
        let line = serde_json::to_string(row).expect("row must serialize");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    pub fn append_raw_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}
