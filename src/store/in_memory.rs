//! Ordered in-memory store.
//!
//! Backs `memory://` addresses, which lets the load generator run without any
//! external service, and doubles as the fake store in tests: it can delay
//! every operation and fail a given number of operations or connects. The
//! store is [`Clone`] so a test can keep a handle for inspection while the
//! pipeline owns its clients.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{BoxedClient, KvClient, KvPair, Session};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<Bytes, Bytes>,
    latency: Duration,
    failing_ops: u32,
    failing_connects: u32,
    #[cfg(test)]
    puts: u64,
    #[cfg(test)]
    scans: u64,
    #[cfg(test)]
    clients: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn latency(&self) -> Duration {
        self.inner.lock().latency
    }

    /// Consumes one injected operation failure, if any are pending.
    fn take_op_failure(inner: &mut Inner) -> bool {
        if inner.failing_ops > 0 {
            inner.failing_ops -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait::async_trait]
impl Session for InMemoryStore {
    async fn create_client(&self) -> Result<BoxedClient> {
        let mut inner = self.inner.lock();
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(StoreError::Injected("connect"));
        }
        #[cfg(test)]
        {
            inner.clients += 1;
        }

        Ok(Box::new(InMemoryClient {
            store: self.clone(),
        }))
    }
}

/// A client handle over a shared [`InMemoryStore`].
struct InMemoryClient {
    store: InMemoryStore,
}

#[async_trait::async_trait]
impl KvClient for InMemoryClient {
    async fn scan(&mut self, prefix: Bytes, limit: usize) -> Result<Vec<KvPair>> {
        let latency = self.store.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.store.inner.lock();
        if InMemoryStore::take_op_failure(&mut inner) {
            return Err(StoreError::Injected("scan"));
        }
        #[cfg(test)]
        {
            inner.scans += 1;
        }

        Ok(inner
            .data
            .range(prefix..)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        let latency = self.store.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.store.inner.lock();
        if InMemoryStore::take_op_failure(&mut inner) {
            return Err(StoreError::Injected("put"));
        }
        #[cfg(test)]
        {
            inner.puts += 1;
        }
        inner.data.insert(key, value);
        Ok(())
    }
}

// ─── Test hooks ──────────────────────────────────────────────────

#[cfg(test)]
impl InMemoryStore {
    /// Delays every scan and put by `latency` before it takes effect.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.lock().latency = latency;
        self
    }

    /// Makes the next `n` scans or puts fail.
    pub fn fail_next_ops(&self, n: u32) {
        self.inner.lock().failing_ops = n;
    }

    /// Makes the next `n` calls to `create_client` fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.lock().failing_connects = n;
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.lock().data.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.inner.lock().data.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Number of successful puts so far.
    pub fn puts(&self) -> u64 {
        self.inner.lock().puts
    }

    /// Number of successful scans so far.
    pub fn scans(&self) -> u64 {
        self.inner.lock().scans
    }

    /// Number of clients handed out so far.
    pub fn clients(&self) -> u64 {
        self.inner.lock().clients
    }
}
