use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_STORE_ADDRESS: &str = "redis://127.0.0.1:6379/";
pub const DEFAULT_DOCUMENT_SIZE: usize = 1 << 10;
pub const DEFAULT_NUM_COLLECTIONS: u32 = 1_000_000;
pub const DEFAULT_NUM_DOCUMENTS: u32 = 1_000_000;
pub const DEFAULT_NUM_READERS: usize = 8;
pub const DEFAULT_NUM_WRITERS: usize = 8;
pub const DEFAULT_REPORT_WINDOW_MS: u64 = 1000;
pub const DEFAULT_SCAN_LIMIT: u32 = 100;

/// Every queue holds this many slots per producer/consumer it serves.
const QUEUE_SLOTS_PER_WORKER: usize = 10;

// ─── Public types ────────────────────────────────────────────────

/// What a worker does when a `scan` or `put` against the store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreErrorPolicy {
    /// Log the failure, drop the action and move on to the next one.
    #[default]
    Skip,
    /// Stop the worker that hit the failure. Other workers keep going.
    FailFast,
}

/// Load generator settings.
///
/// Every flag can also be supplied through a `KVLOADGEN_*` environment
/// variable.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(author, version, about = "Randomized scan/put load generator for key-value stores")]
pub struct Config {
    /// Store to exercise: `redis://host:port/` or `memory://`
    #[arg(long, env = "KVLOADGEN_STORE_ADDRESS", default_value = DEFAULT_STORE_ADDRESS)]
    pub store_address: String,

    /// Length of the random payload written by every put
    #[arg(long, env = "KVLOADGEN_DOCUMENT_SIZE_BYTES", default_value_t = DEFAULT_DOCUMENT_SIZE)]
    pub document_size_bytes: usize,

    /// Size of the collection universe
    #[arg(
        long,
        env = "KVLOADGEN_NUM_COLLECTIONS",
        default_value_t = DEFAULT_NUM_COLLECTIONS,
        value_parser = clap::value_parser!(u32).range(2..)
    )]
    pub num_collections: u32,

    /// Size of the document-key universe
    #[arg(
        long,
        env = "KVLOADGEN_NUM_DOCUMENTS",
        default_value_t = DEFAULT_NUM_DOCUMENTS,
        value_parser = clap::value_parser!(u32).range(2..)
    )]
    pub num_documents: u32,

    /// Number of scan workers
    #[arg(long, env = "KVLOADGEN_NUM_READERS", default_value_t = DEFAULT_NUM_READERS)]
    pub num_readers: usize,

    /// Number of put workers
    #[arg(long, env = "KVLOADGEN_NUM_WRITERS", default_value_t = DEFAULT_NUM_WRITERS)]
    pub num_writers: usize,

    /// Length of one aggregation window in milliseconds
    #[arg(
        long,
        env = "KVLOADGEN_REPORT_WINDOW_MILLIS",
        default_value_t = DEFAULT_REPORT_WINDOW_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub report_window_millis: u64,

    /// Maximum number of pairs returned by one scan
    #[arg(
        long,
        env = "KVLOADGEN_SCAN_LIMIT",
        default_value_t = DEFAULT_SCAN_LIMIT,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub scan_limit: u32,

    /// Behaviour when a store operation fails
    #[arg(long, env = "KVLOADGEN_ON_STORE_ERROR", value_enum, default_value_t = StoreErrorPolicy::Skip)]
    pub on_store_error: StoreErrorPolicy,

    /// Serve `/api/metrics` on this address
    #[arg(long, env = "KVLOADGEN_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Stop after this many seconds instead of running until Ctrl-C
    #[arg(long, env = "KVLOADGEN_RUN_FOR_SECS")]
    pub run_for_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_address: DEFAULT_STORE_ADDRESS.to_owned(),
            document_size_bytes: DEFAULT_DOCUMENT_SIZE,
            num_collections: DEFAULT_NUM_COLLECTIONS,
            num_documents: DEFAULT_NUM_DOCUMENTS,
            num_readers: DEFAULT_NUM_READERS,
            num_writers: DEFAULT_NUM_WRITERS,
            report_window_millis: DEFAULT_REPORT_WINDOW_MS,
            scan_limit: DEFAULT_SCAN_LIMIT,
            on_store_error: StoreErrorPolicy::default(),
            metrics_addr: None,
            run_for_secs: None,
        }
    }
}

impl Config {
    pub fn report_window(&self) -> Duration {
        Duration::from_millis(self.report_window_millis)
    }

    pub fn run_for(&self) -> Option<Duration> {
        self.run_for_secs.map(Duration::from_secs)
    }

    /// Capacity of the action and timing queues that serve `workers` workers.
    ///
    /// Never zero, so a stream with no workers still gets a usable channel.
    pub fn queue_capacity(workers: usize) -> usize {
        (workers * QUEUE_SLOTS_PER_WORKER).max(1)
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_defaults_match_default_impl() {
        let parsed = Config::try_parse_from(["kv-loadgen"]).unwrap();
        let default = Config::default();

        assert_eq!(parsed.document_size_bytes, default.document_size_bytes);
        assert_eq!(parsed.num_collections, default.num_collections);
        assert_eq!(parsed.num_documents, default.num_documents);
        assert_eq!(parsed.num_readers, default.num_readers);
        assert_eq!(parsed.num_writers, default.num_writers);
        assert_eq!(parsed.report_window(), Duration::from_millis(1000));
        assert_eq!(parsed.scan_limit, 100);
        assert_eq!(parsed.on_store_error, StoreErrorPolicy::Skip);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "kv-loadgen",
            "--store-address",
            "memory://",
            "--num-readers",
            "2",
            "--num-writers",
            "3",
            "--on-store-error",
            "fail-fast",
            "--metrics-addr",
            "127.0.0.1:3000",
        ])
        .unwrap();

        assert_eq!(config.store_address, "memory://");
        assert_eq!(config.num_readers, 2);
        assert_eq!(config.num_writers, 3);
        assert_eq!(config.on_store_error, StoreErrorPolicy::FailFast);
        assert_eq!(config.metrics_addr, Some("127.0.0.1:3000".parse().unwrap()));
    }

    #[test]
    fn rejects_degenerate_universes() {
        assert!(Config::try_parse_from(["kv-loadgen", "--num-collections", "1"]).is_err());
        assert!(Config::try_parse_from(["kv-loadgen", "--num-documents", "0"]).is_err());
        assert!(Config::try_parse_from(["kv-loadgen", "--scan-limit", "0"]).is_err());
        assert!(Config::try_parse_from(["kv-loadgen", "--report-window-millis", "0"]).is_err());
    }

    #[test]
    fn queue_capacity_scales_with_workers() {
        assert_eq!(Config::queue_capacity(8), 80);
        assert_eq!(Config::queue_capacity(1), 10);
        assert_eq!(Config::queue_capacity(0), 1);
    }
}
