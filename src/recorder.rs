//! CSV recording of gradient samples.
//!
//! One row per sample: `timestamp,sequence,gradient_info`, where the timestamp
//! is RFC 3339 UTC and `gradient_info` is the compact JSON the controller
//! returned. Rows are flushed as they are written so a crashed run still
//! leaves a usable file.
//!
//! Existing files are appended to, so every run of a session ends up in the
//! same file. The header is only written when the file is empty.

use crate::error::{HplcError, Result};
use crate::interface::GradientSample;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Appends gradient samples to a CSV file.
pub struct SampleRecorder {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: u64,
}

impl SampleRecorder {
    /// Open `path` for appending, creating it with a header row if needed.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer
                .write_record(["timestamp", "sequence", "gradient_info"])
                .map_err(csv_error)?;
            writer.flush()?;
        }
        tracing::info!(path = %path.display(), appending = !is_new, "Recording gradient samples");
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            rows: 0,
        })
    }

    /// Append one sample.
    pub fn record(&mut self, sample: &GradientSample) -> Result<()> {
        let timestamp = sample.timestamp.to_rfc3339();
        let sequence = sample.sequence.to_string();
        let info = sample.info.to_string();
        self.writer
            .write_record([timestamp.as_str(), sequence.as_str(), info.as_str()])
            .map_err(csv_error)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, excluding the header.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn csv_error(err: csv::Error) -> HplcError {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => HplcError::Io(e),
        other => HplcError::Io(std::io::Error::other(format!("CSV error: {:?}", other))),
    }
}
