//! Rolling per-stream latency windows.
//!
//! Each stream has one [`Aggregator`] task that exclusively owns its
//! [`WindowState`]. Samples arrive over the stream's timing queue; once a
//! window has been open longer than the configured length, the next sample
//! closes it and a report line goes to stdout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;
use crate::workload::StreamKind;

/// Count and truncated mean latency of one closed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    pub stream: StreamKind,
    pub count: u64,
    pub avg_us: u64,
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:>6} total updates, avg = {:>9} us",
            self.stream, self.count, self.avg_us
        )
    }
}

/// Running totals of the currently open window.
#[derive(Debug)]
pub struct WindowState {
    stream: StreamKind,
    start: Instant,
    count: u64,
    sum_us: u64,
}

impl WindowState {
    pub fn new(stream: StreamKind, start: Instant) -> Self {
        Self {
            stream,
            start,
            count: 0,
            sum_us: 0,
        }
    }

    /// Adds one sample, truncated to whole microseconds, observed at `now`.
    ///
    /// If the window has been open for more than `window`, it is closed:
    /// the report is returned and a new window starts at `now`.
    pub fn record(&mut self, sample: Duration, now: Instant, window: Duration) -> Option<WindowReport> {
        self.sum_us += sample.as_micros() as u64;
        self.count += 1;

        if now.saturating_duration_since(self.start) <= window {
            return None;
        }

        let report = WindowReport {
            stream: self.stream,
            count: self.count,
            avg_us: self.sum_us / self.count,
        };
        self.count = 0;
        self.sum_us = 0;
        self.start = now;
        Some(report)
    }
}

/// Consumes one stream's timing queue.
pub struct Aggregator {
    pub stream: StreamKind,
    pub samples: Receiver<Duration>,
    pub window: Duration,
    pub metrics: Arc<MetricsCollector>,
    pub cancel: CancellationToken,
}

impl Aggregator {
    /// Runs until the timing queue is closed and drained or the aggregator
    /// is cancelled. Returns the number of reports emitted.
    pub async fn run(self) -> u64 {
        let stream = self.stream;
        let mut state = WindowState::new(stream, Instant::now());
        let mut reports = 0u64;
        info!(%stream, window = ?self.window, "aggregator started");

        loop {
            let sample = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(%stream, "aggregator cancelled");
                    break;
                }
                res = self.samples.recv() => match res {
                    Ok(sample) => sample,
                    Err(_) => {
                        warn!(%stream, "channel has closed");
                        break;
                    }
                },
            };

            self.metrics.record(stream, sample.as_micros() as u64);
            if let Some(report) = state.record(sample, Instant::now(), self.window) {
                println!("{report}");
                self.metrics.record_window(&report);
                reports += 1;
            }
        }

        reports
    }
}

// ─── Tests ───────────────────────────────────────────────────────
