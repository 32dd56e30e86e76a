//! The narrow scan/put boundary to the key-value store under test.
//!
//! Workers never talk to a concrete client. They hold a [`BoxedClient`]
//! obtained from a shared [`Session`], and go through [`scan`] and [`put`],
//! which own the `<collection>#<key>` composite-key convention.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, StoreError};

mod in_memory;
mod redis_client;

pub use in_memory::InMemoryStore;
pub use redis_client::RedisSession;

/// Separator between the collection and the document key.
pub const KEY_SEPARATOR: char = '#';

/// One key/value pair returned by a scan.
pub type KvPair = (Bytes, Bytes);

pub type BoxedClient = Box<dyn KvClient>;
pub type SharedSession = Arc<dyn Session>;

/// A single connection to the store, owned by exactly one worker.
#[async_trait::async_trait]
pub trait KvClient: Send + 'static {
    /// Returns up to `limit` pairs whose key is lexicographically `>= prefix`.
    async fn scan(&mut self, prefix: Bytes, limit: usize) -> Result<Vec<KvPair>>;

    /// Upserts one key.
    async fn put(&mut self, key: Bytes, value: Bytes) -> Result<()>;
}

/// Factory for [`KvClient`] handles, shared read-only by the bootstrap code.
#[async_trait::async_trait]
pub trait Session: Send + Sync + 'static {
    async fn create_client(&self) -> Result<BoxedClient>;
}

/// Opens a session for `address`, picking the backend from its scheme.
pub async fn open(address: &str) -> Result<SharedSession> {
    if address.starts_with("redis://") {
        Ok(Arc::new(RedisSession::open(address)?))
    } else if address.starts_with("memory://") {
        Ok(Arc::new(InMemoryStore::new()))
    } else {
        Err(StoreError::InvalidAddress {
            address: address.to_owned(),
            reason: "expected a redis:// or memory:// address".to_owned(),
        })
    }
}

// ─── Composite keys ──────────────────────────────────────────────

/// UTF-8 bytes of `"<collection>#<key>"`.
pub fn composite_key(collection: &str, key: &str) -> Bytes {
    Bytes::from(format!("{collection}{KEY_SEPARATOR}{key}"))
}

/// Scans the key space of `collection`, starting at `"<collection>#"`.
pub async fn scan(
    client: &mut dyn KvClient,
    collection: &str,
    limit: usize,
) -> Result<Vec<KvPair>> {
    client.scan(composite_key(collection, ""), limit).await
}

/// Writes `value` under `"<collection>#<key>"`.
pub async fn put(client: &mut dyn KvClient, collection: &str, key: &str, value: &str) -> Result<()> {
    client
        .put(composite_key(collection, key), Bytes::copy_from_slice(value.as_bytes()))
        .await
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_joins_with_separator() {
        assert_eq!(composite_key("collection-3", "42"), Bytes::from_static(b"collection-3#42"));
        assert_eq!(composite_key("collection-3", ""), Bytes::from_static(b"collection-3#"));
    }

    #[tokio::test]
    async fn put_composes_the_key() {
        let store = InMemoryStore::new();
        let mut client = store.create_client().await.unwrap();

        put(client.as_mut(), "collection-3", "42", "abc").await.unwrap();

        assert_eq!(store.get(b"collection-3#42"), Some(Bytes::from_static(b"abc")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn scan_starts_at_the_collection_prefix() {
        let store = InMemoryStore::new();
        let mut client = store.create_client().await.unwrap();

        put(client.as_mut(), "collection-1", "9", "x").await.unwrap();
        put(client.as_mut(), "collection-2", "1", "a").await.unwrap();
        put(client.as_mut(), "collection-2", "2", "b").await.unwrap();

        let pairs = scan(client.as_mut(), "collection-2", 100).await.unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![Bytes::from_static(b"collection-2#1"), Bytes::from_static(b"collection-2#2")]
        );
    }

    #[tokio::test]
    async fn open_picks_backend_from_scheme() {
        assert!(open("memory://").await.is_ok());
        assert!(open("redis://127.0.0.1:6379/").await.is_ok());
        assert!(matches!(
            open("tikv://pd:2379").await,
            Err(StoreError::InvalidAddress { .. })
        ));
        // No TLS support is compiled in.
        assert!(matches!(
            open("rediss://127.0.0.1:6380/").await,
            Err(StoreError::InvalidAddress { .. })
        ));
    }
}
