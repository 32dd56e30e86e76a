use std::collections::VecDeque;
use std::time::Instant;

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use super::percentiles::PercentileSet;
use crate::aggregator::WindowReport;
use crate::workload::StreamKind;

// ─── Configuration ───────────────────────────────────────────────

/// How many emitted window reports we keep for the status endpoint
const MAX_RECENT_WINDOWS: usize = 120;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe run-wide statistics.
///
/// Aggregators feed every latency sample and every emitted window in here,
/// workers count their store failures, and the status endpoint and the
/// shutdown summary read snapshots.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

/// One emitted aggregation window, stamped with the time since start.
///
/// `seq` starts at 1 and increases by one per window across both streams.
#[derive(Debug, Clone, Serialize)]
pub struct WindowRecord {
    pub seq: u64,
    pub elapsed_ms: u64,
    pub stream: StreamKind,
    pub count: u64,
    pub avg_us: u64,
}

/// Totals for one stream since the run started.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub latency: PercentileSet,
    pub workers: usize,
    pub total_ops: u64,
    pub total_errors: u64,
    pub ops_per_sec: f64,
}

/// Everything the status endpoint serves.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub read: StreamSnapshot,
    pub write: StreamSnapshot,
    pub elapsed_secs: f64,
    pub recent_windows: Vec<WindowRecord>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    read: StreamStats,
    write: StreamStats,
    recent_windows: VecDeque<WindowRecord>,
    last_window_seq: u64,
    start_time: Instant,
}

struct StreamStats {
    hist: Histogram<u64>,
    workers: usize,
    total_ops: u64,
    total_errors: u64,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Record one completed operation's latency.
    pub fn record(&self, stream: StreamKind, latency_us: u64) {
        let mut inner = self.inner.lock();
        let stats = inner.stream_mut(stream);
        stats.total_ops += 1;
        // Clamp to ≥ 1 μs, saturate above the histogram range
        stats.hist.saturating_record(latency_us.max(HIST_LOW));
    }

    /// Count one failed store operation.
    pub fn record_error(&self, stream: StreamKind) {
        self.inner.lock().stream_mut(stream).total_errors += 1;
    }

    /// Keep an emitted window report for the status endpoint.
    pub fn record_window(&self, report: &WindowReport) {
        self.inner.lock().push_window(report);
    }

    /// Window records newer than `after_seq`, oldest first.
    ///
    /// Records already evicted from the ring are not returned.
    pub fn windows_since(&self, after_seq: u64) -> Vec<WindowRecord> {
        self.inner
            .lock()
            .recent_windows
            .iter()
            .filter(|w| w.seq > after_seq)
            .cloned()
            .collect()
    }

    /// Number of workers that connected and started for `stream`.
    pub fn set_workers(&self, stream: StreamKind, workers: usize) {
        self.inner.lock().stream_mut(stream).workers = workers;
    }

    /// Produce a read-only snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            read: StreamStats::new(),
            write: StreamStats::new(),
            recent_windows: VecDeque::with_capacity(MAX_RECENT_WINDOWS + 1),
            last_window_seq: 0,
            start_time: Instant::now(),
        }
    }

    fn stream_mut(&mut self, stream: StreamKind) -> &mut StreamStats {
        match stream {
            StreamKind::Read => &mut self.read,
            StreamKind::Write => &mut self.write,
        }
    }

    fn push_window(&mut self, report: &WindowReport) {
        self.last_window_seq += 1;
        self.recent_windows.push_back(WindowRecord {
            seq: self.last_window_seq,
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            stream: report.stream,
            count: report.count,
            avg_us: report.avg_us,
        });
        if self.recent_windows.len() > MAX_RECENT_WINDOWS {
            self.recent_windows.pop_front();
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();

        MetricsSnapshot {
            read: self.read.snapshot(elapsed_secs),
            write: self.write.snapshot(elapsed_secs),
            elapsed_secs,
            recent_windows: self.recent_windows.iter().cloned().collect(),
        }
    }
}

impl StreamStats {
    fn new() -> Self {
        Self {
            hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
            workers: 0,
            total_ops: 0,
            total_errors: 0,
        }
    }

    fn snapshot(&self, elapsed_secs: f64) -> StreamSnapshot {
        let ops_per_sec = if elapsed_secs > 0.0 {
            self.total_ops as f64 / elapsed_secs
        } else {
            0.0
        };

        StreamSnapshot {
            latency: PercentileSet::from_histogram(&self.hist),
            workers: self.workers,
            total_ops: self.total_ops,
            total_errors: self.total_errors,
            ops_per_sec,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────
