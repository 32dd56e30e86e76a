use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;

// ─── Constants ───────────────────────────────────────────────────

/// Payload alphabet: ASCII letters, both cases.
pub const LETTER_BYTES: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// ─── Streams & actions ───────────────────────────────────────────

/// The read path or the write path. Each has its own action queue, workers,
/// timing queue and aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Read,
    Write,
}

impl StreamKind {
    /// Short label used in report lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "R",
            Self::Write => "W",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scan one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAction {
    pub collection: String,
}

/// Put one random document into one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAction {
    pub collection: String,
    pub key: String,
    pub value: String,
}

// ─── Random generation ───────────────────────────────────────────

/// Universe sizes the generators draw from.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadShape {
    pub num_collections: u32,
    pub num_documents: u32,
    pub document_size: usize,
}

impl WorkloadShape {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_collections: config.num_collections,
            num_documents: config.num_documents,
            document_size: config.document_size_bytes,
        }
    }

    pub fn read_action<R: Rng>(&self, rng: &mut R) -> ReadAction {
        ReadAction {
            collection: self.collection(rng),
        }
    }

    pub fn write_action<R: Rng>(&self, rng: &mut R) -> WriteAction {
        WriteAction {
            collection: self.collection(rng),
            key: rng.gen_range(1..self.num_documents).to_string(),
            value: make_term(rng, self.document_size),
        }
    }

    fn collection<R: Rng>(&self, rng: &mut R) -> String {
        format!("collection-{}", rng.gen_range(1..self.num_collections))
    }
}

/// A random string of `n` letters from [`LETTER_BYTES`].
pub fn make_term<R: Rng>(rng: &mut R, n: usize) -> String {
    (0..n)
        .map(|_| LETTER_BYTES[rng.gen_range(0..LETTER_BYTES.len())] as char)
        .collect()
}

/// An RNG seeded from the wall clock's nanoseconds, so runs differ.
pub fn clock_seeded_rng() -> StdRng {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    StdRng::seed_from_u64(nanos)
}

// ─── Generator loop ──────────────────────────────────────────────

/// Feeds `actions` with freshly generated actions until the queue closes or
/// `cancel` fires. Sending waits while the queue is full, which is what
/// throttles generation to the pace of the workers.
///
/// Returns the number of actions handed to the queue.
pub async fn run_generator<A, F>(
    stream: StreamKind,
    actions: Sender<A>,
    cancel: CancellationToken,
    mut next: F,
) -> u64
where
    A: Send,
    F: FnMut(&mut StdRng) -> A,
{
    let mut rng = clock_seeded_rng();
    let mut sent = 0u64;

    loop {
        let action = next(&mut rng);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%stream, sent, "generator cancelled");
                break;
            }
            res = actions.send(action) => {
                if res.is_err() {
                    warn!(%stream, sent, "channel has closed");
                    break;
                }
                sent += 1;
            }
        }
    }

    sent
}

// ─── Tests ───────────────────────────────────────────────────────
