use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod aggregator;
mod config;
mod error;
mod metrics;
mod observability;
mod pipeline;
mod server;
mod store;
mod worker;
mod workload;

use config::Config;
use metrics::{MetricsCollector, MetricsSnapshot};
use pipeline::Pipeline;

/// Shared state for the status endpoint handlers via `State<Arc<AppState>>`.
pub struct AppState {
    /// Run-wide latency and throughput statistics.
    pub metrics: Arc<MetricsCollector>,

    /// Effective configuration, served as-is.
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    observability::initialize_tracing();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   KV LOAD GENERATOR · randomized scan / put      ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Open the store session ────────────────────────────────
    let session = store::open(&config.store_address)
        .await
        .with_context(|| format!("opening store {:?}", config.store_address))?;
    info!(
        store = %config.store_address,
        readers = config.num_readers,
        writers = config.num_writers,
        document_size = config.document_size_bytes,
        "session opened"
    );

    // ── 2. Start generators, workers and aggregators ─────────────
    let metrics = Arc::new(MetricsCollector::new());
    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(&config, session.as_ref(), metrics.clone(), cancel.clone()).await;

    if pipeline.readers + pipeline.writers == 0 && config.num_readers + config.num_writers > 0 {
        cancel.cancel();
        pipeline.join().await;
        anyhow::bail!("no worker could connect to {}", config.store_address);
    }

    // ── 3. Optional status endpoint ──────────────────────────────
    let server = config.metrics_addr.map(|addr| {
        let state = Arc::new(AppState {
            metrics: metrics.clone(),
            config: config.clone(),
        });
        tokio::spawn(server::serve(addr, state, cancel.clone()))
    });

    // ── 4. Run until Ctrl-C or the configured duration ──────────
    wait_for_shutdown(config.run_for()).await;
    info!("shutting down");
    cancel.cancel();
    pipeline.join().await;

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "metrics endpoint failed"),
            Err(err) => error!(error = %err, "metrics endpoint task failed"),
        }
    }

    print_summary(&metrics.snapshot());
    Ok(())
}

async fn wait_for_shutdown(run_for: Option<Duration>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    };

    match run_for {
        Some(duration) => tokio::select! {
            _ = ctrl_c => {}
            _ = tokio::time::sleep(duration) => {}
        },
        None => ctrl_c.await,
    }
}

fn print_summary(snapshot: &MetricsSnapshot) {
    println!();
    println!("── Summary after {:.1}s ─────────────────────────────", snapshot.elapsed_secs);
    for (label, stream) in [("R", &snapshot.read), ("W", &snapshot.write)] {
        println!(
            "[{label}] workers={} ops={} errors={} rate={:.1}/s",
            stream.workers, stream.total_ops, stream.total_errors, stream.ops_per_sec
        );
        println!("[{label}] {}", stream.latency);
    }
    println!();
}
