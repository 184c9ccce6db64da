//! Metrics export functionality for various formats.

use super::metrics::MetricsSnapshot;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Trait for exporting metrics to different formats
pub trait MetricsExporter {
    /// Export a metrics snapshot
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Export metrics to JSON format
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    /// Exporter writing to `output_path`.
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let serializable = SerializableSnapshot::from(snapshot);
        let json = serde_json::to_string_pretty(&serializable)
            .map_err(|e| Error::config(format!("JSON serialization failed: {}", e)))?;

        std::fs::write(&self.output_path, json)?;

        Ok(())
    }
}

/// Serializable version of MetricsSnapshot
#[derive(Debug, Clone, serde::Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    buffers_allocated: u64,
    allocated_mb: f64,
    uploaded_mb: f64,
    downloaded_mb: f64,
    kernels_enqueued: u64,
    stage_ms: BTreeMap<&'static str, f64>,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        const MB: f64 = 1024.0 * 1024.0;

        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            buffers_allocated: snapshot.buffers_allocated,
            allocated_mb: snapshot.bytes_allocated as f64 / MB,
            uploaded_mb: snapshot.bytes_uploaded as f64 / MB,
            downloaded_mb: snapshot.bytes_downloaded as f64 / MB,
            kernels_enqueued: snapshot.kernels_enqueued,
            stage_ms: snapshot
                .stages
                .iter()
                .map(|(name, ns)| (*name, *ns as f64 / 1_000_000.0))
                .collect(),
        }
    }
}

/// Export metrics to the log at debug level
#[derive(Debug, Default)]
pub struct LogExporter;

impl MetricsExporter for LogExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        for (stage, ns) in &snapshot.stages {
            tracing::debug!(stage = *stage, ms = *ns as f64 / 1_000_000.0, "stage latency");
        }
        tracing::debug!(
            buffers = snapshot.buffers_allocated,
            uploaded = snapshot.bytes_uploaded,
            downloaded = snapshot.bytes_downloaded,
            total = snapshot.bytes_transferred(),
            kernels = snapshot.kernels_enqueued,
            "device traffic"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn dummy_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: Duration::from_secs(2),
            buffers_allocated: 3,
            bytes_allocated: 3 * 1024 * 1024,
            bytes_uploaded: 2 * 1024 * 1024,
            bytes_downloaded: 1024 * 1024,
            kernels_enqueued: 1,
            max_stage_ns: 5_000_000,
            stages: vec![("upload", 2_000_000), ("dispatch", 5_000_000)],
        }
    }

    #[test]
    fn test_log_exporter() {
        assert!(LogExporter.export(&dummy_snapshot()).is_ok());
    }

    #[test]
    fn test_json_exporter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let exporter = JsonExporter::new(&path);

        exporter.export(&dummy_snapshot()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["kernels_enqueued"], 1);
        assert_eq!(json["buffers_allocated"], 3);
        assert_eq!(json["stage_ms"]["dispatch"], 5.0);
    }
}
