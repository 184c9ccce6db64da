//! Metrics collection for pipeline monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use hdrhistogram::Histogram;
use parking_lot::RwLock;

/// Pipeline stage a latency sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SelectDevice,
    CreateContext,
    BuildProgram,
    Allocate,
    Upload,
    Dispatch,
    Download,
}

impl Stage {
    /// Label used in logs and exported JSON.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::SelectDevice => "select_device",
            Stage::CreateContext => "create_context",
            Stage::BuildProgram => "build_program",
            Stage::Allocate => "allocate",
            Stage::Upload => "upload",
            Stage::Dispatch => "dispatch",
            Stage::Download => "download",
        }
    }
}

/// Pipeline metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Device resource counters
    buffers_allocated: AtomicU64,
    bytes_allocated: AtomicU64,
    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    kernels_enqueued: AtomicU64,

    // Stage latency histogram (protected by RwLock for interior mutability)
    stage_histogram: RwLock<Histogram<u64>>,
    stages: RwLock<Vec<(Stage, u64)>>,

    start_time: Instant,
}

impl Metrics {
    /// Create an empty collector
    pub fn new() -> Self {
        // 3 significant figures, max value of 1 hour in nanoseconds
        let histogram = Histogram::new_with_max(3_600_000_000_000, 3)
            .expect("static histogram bounds are valid");

        Self {
            buffers_allocated: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            kernels_enqueued: AtomicU64::new(0),
            stage_histogram: RwLock::new(histogram),
            stages: RwLock::new(Vec::new()),
            start_time: Instant::now(),
        }
    }

    /// Record how long a pipeline stage took
    pub fn record_stage(&self, stage: Stage, duration: Duration) {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;

        if let Some(mut hist) = self.stage_histogram.try_write() {
            let _ = hist.record(nanos.max(1));
        }
        self.stages.write().push((stage, nanos));
    }

    /// Record a device buffer allocation
    pub fn record_allocation(&self, bytes: u64) {
        self.buffers_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes copied host to device
    pub fn record_upload(&self, bytes: u64) {
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes copied device to host
    pub fn record_download(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one kernel launch
    pub fn record_enqueue(&self) {
        self.kernels_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Kernel launches so far
    pub fn kernels_enqueued(&self) -> u64 {
        self.kernels_enqueued.load(Ordering::Relaxed)
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.stage_histogram.read();

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            buffers_allocated: self.buffers_allocated.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            kernels_enqueued: self.kernels_enqueued.load(Ordering::Relaxed),
            max_stage_ns: histogram.max(),
            stages: self
                .stages
                .read()
                .iter()
                .map(|(stage, ns)| (stage.name(), *ns))
                .collect(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.buffers_allocated.store(0, Ordering::Relaxed);
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.bytes_uploaded.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.kernels_enqueued.store(0, Ordering::Relaxed);
        self.stages.write().clear();

        if let Some(mut hist) = self.stage_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub buffers_allocated: u64,
    pub bytes_allocated: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub kernels_enqueued: u64,
    pub max_stage_ns: u64,
    /// Stage latencies in the order they were recorded.
    pub stages: Vec<(&'static str, u64)>,
}

impl MetricsSnapshot {
    /// Latency of the most recent sample for `stage`, if any
    pub fn stage_ns(&self, stage: Stage) -> Option<u64> {
        self.stages
            .iter()
            .rev()
            .find(|(name, _)| *name == stage.name())
            .map(|(_, ns)| *ns)
    }

    /// Bytes moved across the host/device boundary
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_uploaded + self.bytes_downloaded
    }
}
