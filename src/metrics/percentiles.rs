use std::fmt;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Latency percentiles of one stream, in microseconds.
/// Served as JSON and printed in the shutdown summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Extract a percentile set from a microsecond histogram.
    /// An empty histogram yields all zeroes.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::default();
        }

        Self {
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_quantile(0.50),
            p95_us: hist.value_at_quantile(0.95),
            p99_us: hist.value_at_quantile(0.99),
            p999_us: hist.value_at_quantile(0.999),
            count: hist.len(),
        }
    }
}

impl fmt::Display for PercentileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={:<9} min={:>8} p50={:>8} p95={:>8} p99={:>8} p99.9={:>8} max={:>8} mean={:>10.1} (us)",
            self.count,
            self.min_us,
            self.p50_us,
            self.p95_us,
            self.p99_us,
            self.p999_us,
            self.max_us,
            self.mean_us,
        )
    }
}
