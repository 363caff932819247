use super::MetricsSnapshot;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Destination for a finished run's raw metrics.
pub trait MetricsSink {
    fn persist(&self, snapshot: &MetricsSnapshot, completed_at: f64) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMetrics {
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    pub completed_at: f64,
}

/// Writes one pretty-printed JSON file per run into `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(snapshot: &MetricsSnapshot, completed_at: f64) -> String {
        format!("tcp_{}_metrics_{}.json", snapshot.role, completed_at as u64)
    }
}

impl MetricsSink for JsonFileSink {
    fn persist(&self, snapshot: &MetricsSnapshot, completed_at: f64) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(snapshot, completed_at));

        let record = PersistedMetrics {
            snapshot: snapshot.clone(),
            completed_at,
        };
        write_record(File::create(&path)?, &record)?;

        Ok(path)
    }
}

/// Buffered JSON write; errors from the final flush are reported too.
fn write_record<W: Write>(out: W, record: &PersistedMetrics) -> Result<()> {
    let mut writer = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut writer, record)?;
    writer.flush()?;
    Ok(())
}
