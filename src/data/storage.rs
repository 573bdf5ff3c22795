//! CSV persistence of acquired repeats.
//!
//! Every completed repeat is written to its own file named
//! `{tag}-run{run_number}-{timestamp}.csv` under the configured output
//! directory, one row per (axis, point). A persistence failure never fails
//! the run itself; the sequencer logs it and keeps acquiring.

use crate::acquisition::buffer::BufferSnapshot;
use crate::error::{GradError, GradResult};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writer for per-repeat CSV files.
#[derive(Debug)]
pub struct RunStorage {
    output_dir: PathBuf,
}

impl RunStorage {
    /// Create a storage handle rooted at the given directory.
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Directory files are written into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write one snapshot to a fresh CSV file, returning its path.
    pub fn persist(&self, tag: &str, snapshot: &BufferSnapshot) -> GradResult<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;

        let file_name = format!(
            "{}-run{}-{}.csv",
            tag,
            snapshot.run_number,
            chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f")
        );
        let path = self.output_dir.join(file_name);

        let file = File::create(&path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(["axis", "x", "value", "error"])
            .map_err(|e| GradError::Storage(e.to_string()))?;

        for (axis, series) in snapshot.axes.iter().enumerate() {
            for i in 0..series.len() {
                writer
                    .write_record(&[
                        axis.to_string(),
                        series.x[i].to_string(),
                        series.value[i].to_string(),
                        series.error[i].to_string(),
                    ])
                    .map_err(|e| GradError::Storage(e.to_string()))?;
            }
        }
        writer.flush()?;
        Ok(path)
    }
}
