use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::store::Session;
use crate::worker::{Action, Worker};
use crate::workload::{run_generator, ReadAction, StreamKind, WorkloadShape, WriteAction};

/// The running generator → worker → aggregator graph.
///
/// Every task stops on its own once its queues close, or all at once when
/// the cancellation token passed to [`Pipeline::start`] fires.
pub struct Pipeline {
    tasks: Vec<JoinHandle<()>>,
    pub readers: usize,
    pub writers: usize,
}

impl Pipeline {
    /// Wires up the four queues and spawns two generators, the worker pool
    /// and two aggregators.
    ///
    /// Each worker dials its own client from `session`. A worker whose
    /// connection fails is skipped and the pool runs short-handed.
    pub async fn start(
        config: &Config,
        session: &dyn Session,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Self {
        let read_capacity = Config::queue_capacity(config.num_readers);
        let write_capacity = Config::queue_capacity(config.num_writers);

        let (read_times_tx, read_times_rx) = async_channel::bounded::<Duration>(read_capacity);
        let (write_times_tx, write_times_rx) = async_channel::bounded::<Duration>(write_capacity);
        let (read_actions_tx, read_actions_rx) = async_channel::bounded::<ReadAction>(read_capacity);
        let (write_actions_tx, write_actions_rx) =
            async_channel::bounded::<WriteAction>(write_capacity);

        let shape = WorkloadShape::from_config(config);
        let mut tasks = Vec::new();

        // ── Generators ──────────────────────────────────────────
        tasks.push(spawn_generator(
            StreamKind::Read,
            read_actions_tx,
            cancel.clone(),
            move |rng| shape.read_action(rng),
        ));
        tasks.push(spawn_generator(
            StreamKind::Write,
            write_actions_tx,
            cancel.clone(),
            move |rng| shape.write_action(rng),
        ));

        // ── Workers ─────────────────────────────────────────────
        let pool = WorkerPool {
            session,
            config,
            metrics: &metrics,
            cancel: &cancel,
        };
        let writers = pool
            .spawn(config.num_writers, &write_actions_rx, &write_times_tx, &mut tasks)
            .await;
        let readers = pool
            .spawn(config.num_readers, &read_actions_rx, &read_times_tx, &mut tasks)
            .await;

        // ── Aggregators ─────────────────────────────────────────
        for (stream, samples) in [
            (StreamKind::Read, read_times_rx),
            (StreamKind::Write, write_times_rx),
        ] {
            let aggregator = Aggregator {
                stream,
                samples,
                window: config.report_window(),
                metrics: metrics.clone(),
                cancel: cancel.clone(),
            };
            tasks.push(tokio::spawn(async move {
                let reports = aggregator.run().await;
                debug!(%stream, reports, "aggregator stopped");
            }));
        }

        info!(readers, writers, "pipeline started");
        Self {
            tasks,
            readers,
            writers,
        }
    }

    /// Waits for every task to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "pipeline task failed");
            }
        }
    }
}

fn spawn_generator<A, F>(
    stream: StreamKind,
    actions: Sender<A>,
    cancel: CancellationToken,
    next: F,
) -> JoinHandle<()>
where
    A: Send + 'static,
    F: FnMut(&mut rand::rngs::StdRng) -> A + Send + 'static,
{
    tokio::spawn(async move {
        let sent = run_generator(stream, actions, cancel, next).await;
        debug!(%stream, sent, "generator stopped");
    })
}

/// Shared ingredients for spawning workers of either stream.
struct WorkerPool<'a> {
    session: &'a dyn Session,
    config: &'a Config,
    metrics: &'a Arc<MetricsCollector>,
    cancel: &'a CancellationToken,
}

impl WorkerPool<'_> {
    /// Spawns up to `count` workers and returns how many actually started.
    async fn spawn<A: Action>(
        &self,
        count: usize,
        actions: &Receiver<A>,
        timings: &Sender<Duration>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> usize {
        let stream = A::STREAM;
        let mut started = 0;

        for id in 0..count {
            let client = match self.session.create_client().await {
                Ok(client) => client,
                Err(err) => {
                    error!(%stream, worker = id, error = %err, "error connecting to kv store");
                    continue;
                }
            };

            let worker = Worker {
                id,
                client,
                actions: actions.clone(),
                timings: timings.clone(),
                scan_limit: self.config.scan_limit as usize,
                policy: self.config.on_store_error,
                metrics: self.metrics.clone(),
                cancel: self.cancel.clone(),
            };
            tasks.push(tokio::spawn(async move {
                match worker.run().await {
                    Ok(stats) => debug!(
                        %stream,
                        worker = id,
                        completed = stats.completed,
                        failed = stats.failed,
                        "worker stopped"
                    ),
                    Err(err) => error!(%stream, worker = id, error = %err, "worker aborted"),
                }
            }));
            started += 1;
        }

        self.metrics.set_workers(stream, started);
        started
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreErrorPolicy;
    use crate::store::InMemoryStore;

    fn small_config() -> Config {
        Config {
            store_address: "memory://".into(),
            document_size_bytes: 16,
            num_collections: 10,
            num_documents: 10,
            num_readers: 2,
            num_writers: 2,
            report_window_millis: 50,
            scan_limit: 5,
            ..Config::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_both_streams_until_cancelled() {
        crate::observability::init_test();
        let store = InMemoryStore::new().with_latency(Duration::from_millis(1));
        let metrics = Arc::new(MetricsCollector::new());
        let cancel = CancellationToken::new();

        let pipeline = Pipeline::start(&small_config(), &store, metrics.clone(), cancel.clone()).await;
        assert_eq!((pipeline.readers, pipeline.writers), (2, 2));

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        pipeline.join().await;

        assert!(store.puts() > 0);
        assert!(store.scans() > 0);

        let snap = metrics.snapshot();
        assert_eq!(snap.read.workers, 2);
        assert_eq!(snap.write.workers, 2);
        assert!(snap.read.total_ops > 0);
        assert!(snap.write.total_ops > 0);
        assert!(snap.recent_windows.iter().any(|w| w.stream == StreamKind::Read));
        assert!(snap.recent_windows.iter().any(|w| w.stream == StreamKind::Write));
        // Samples aggregated never exceed completed store operations.
        assert!(snap.write.total_ops <= store.puts());
        assert!(snap.read.total_ops <= store.scans());
        for key in store.keys() {
            let key = std::str::from_utf8(&key).unwrap();
            let (collection, doc) = key.split_once('#').unwrap();
            assert!(collection.starts_with("collection-"));
            assert!(doc.parse::<u32>().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connections_shrink_the_pool() {
        let store = InMemoryStore::new().with_latency(Duration::from_millis(1));
        store.fail_next_connects(1);
        let metrics = Arc::new(MetricsCollector::new());
        let cancel = CancellationToken::new();

        let pipeline = Pipeline::start(&small_config(), &store, metrics.clone(), cancel.clone()).await;

        // Writers are dialled first, so the write pool loses a slot.
        assert_eq!(pipeline.writers, 1);
        assert_eq!(pipeline.readers, 2);
        assert_eq!(store.clients(), 3);
        assert_eq!(metrics.snapshot().write.workers, 1);

        cancel.cancel();
        pipeline.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_workers_close_their_stream() {
        let store = InMemoryStore::new().with_latency(Duration::from_millis(1));
        store.fail_next_ops(4);
        let config = Config {
            num_readers: 1,
            num_writers: 1,
            on_store_error: StoreErrorPolicy::FailFast,
            ..small_config()
        };
        let metrics = Arc::new(MetricsCollector::new());

        let pipeline = Pipeline::start(&config, &store, metrics.clone(), CancellationToken::new()).await;

        // Both workers die on their first operation; generators and
        // aggregators then see their queues close and wind down unaided.
        pipeline.join().await;

        let snap = metrics.snapshot();
        assert_eq!(snap.read.total_errors + snap.write.total_errors, 2);
        assert_eq!(snap.read.total_ops + snap.write.total_ops, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_backs_up_into_the_generator() {
        let store = InMemoryStore::new().with_latency(Duration::from_millis(100));
        let metrics = Arc::new(MetricsCollector::new());
        let cancel = CancellationToken::new();
        let shape = WorkloadShape::from_config(&small_config());

        let (actions_tx, actions_rx) = async_channel::bounded::<WriteAction>(2);
        let (timings_tx, timings_rx) = async_channel::bounded::<Duration>(100);

        let generator = tokio::spawn(run_generator(
            StreamKind::Write,
            actions_tx,
            cancel.clone(),
            move |rng| shape.write_action(rng),
        ));
        let worker = Worker {
            id: 0,
            client: store.create_client().await.unwrap(),
            actions: actions_rx.clone(),
            timings: timings_tx,
            scan_limit: 5,
            policy: StoreErrorPolicy::Skip,
            metrics,
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(1050)).await;

        // The queue is saturated while the store has only done ~10 puts.
        assert_eq!(actions_rx.len(), 2);
        let puts = store.puts();
        assert!((9..=11).contains(&puts), "puts = {puts}");
        assert_eq!(timings_rx.len() as u64, puts);

        cancel.cancel();
        let sent = generator.await.unwrap();
        let stats = worker.await.unwrap().unwrap();

        // Nothing was generated beyond what the queue and worker absorbed.
        assert!(sent <= stats.completed + 2 + 1, "sent = {sent}");
        assert!(sent >= stats.completed + 2, "sent = {sent}");
    }
}
