use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{BoxedClient, KvClient, KvPair, Session};
use crate::error::{Result, StoreError};

/// Sorted set holding every written key with score 0, so `ZRANGEBYLEX` can
/// serve ordered range scans over the plain string keyspace.
const KEY_INDEX: &str = "kvloadgen:keys";

/// Redis-backed session.
///
/// Opening the session only validates the URL. Every `create_client` call
/// makes exactly one connection attempt, so each worker owns its own TCP
/// connection and a refused connect fails the slot at once.
pub struct RedisSession {
    client: redis::Client,
}

impl RedisSession {
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| StoreError::InvalidAddress {
            address: url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Session for RedisSession {
    async fn create_client(&self) -> Result<BoxedClient> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!(addr = ?self.client.get_connection_info().addr, "opened redis connection");
        Ok(Box::new(RedisKvClient { conn }))
    }
}

struct RedisKvClient {
    conn: MultiplexedConnection,
}

#[async_trait::async_trait]
impl KvClient for RedisKvClient {
    async fn scan(&mut self, prefix: Bytes, limit: usize) -> Result<Vec<KvPair>> {
        let keys: Vec<Vec<u8>> = scan_cmd(&prefix, limit).query_async(&mut self.conn).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut self.conn)
            .await?;

        Ok(pair_values(keys, values))
    }

    async fn put(&mut self, key: Bytes, value: Bytes) -> Result<()> {
        let _: () = put_pipeline(&key, &value).query_async(&mut self.conn).await?;
        Ok(())
    }
}

// ─── Command building ────────────────────────────────────────────

/// `ZRANGEBYLEX <index> [<prefix> + LIMIT 0 <limit>`: up to `limit` indexed
/// keys that sort at or after `prefix`.
fn scan_cmd(prefix: &[u8], limit: usize) -> redis::Cmd {
    let mut min = Vec::with_capacity(prefix.len() + 1);
    min.push(b'[');
    min.extend_from_slice(prefix);

    let mut cmd = redis::cmd("ZRANGEBYLEX");
    cmd.arg(KEY_INDEX).arg(min).arg("+").arg("LIMIT").arg(0).arg(limit);
    cmd
}

/// `MULTI; SET key value; ZADD <index> 0 key; EXEC`, so the value and its
/// index entry land together.
fn put_pipeline(key: &[u8], value: &[u8]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .set(key, value)
        .ignore()
        .zadd(KEY_INDEX, key, 0)
        .ignore();
    pipe
}

/// Zips scanned keys with their `MGET` values, dropping keys deleted
/// between the two round trips.
fn pair_values(keys: Vec<Vec<u8>>, values: Vec<Option<Vec<u8>>>) -> Vec<KvPair> {
    keys.into_iter()
        .zip(values)
        .filter_map(|(k, v)| v.map(|v| (Bytes::from(k), Bytes::from(v))))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    /// RESP encoding of one command.
    fn resp(args: &[&[u8]]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len()).into_bytes();
        for arg in args {
            out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    #[test]
    fn scan_is_an_inclusive_lex_range_with_limit() {
        let packed = scan_cmd(b"collection-2#", 100).get_packed_command();

        assert_eq!(
            packed,
            resp(&[
                b"ZRANGEBYLEX",
                KEY_INDEX.as_bytes(),
                b"[collection-2#",
                b"+",
                b"LIMIT",
                b"0",
                b"100",
            ])
        );
    }

    #[test]
    fn put_writes_value_and_index_atomically() {
        let packed = put_pipeline(b"collection-3#42", b"abc").get_packed_pipeline();

        let mut expected = resp(&[b"MULTI"]);
        expected.extend(resp(&[b"SET", b"collection-3#42", b"abc"]));
        expected.extend(resp(&[b"ZADD", KEY_INDEX.as_bytes(), b"0", b"collection-3#42"]));
        expected.extend(resp(&[b"EXEC"]));
        assert_eq!(packed, expected);
    }

    #[test]
    fn pairing_skips_vanished_values() {
        let keys = vec![b"a#1".to_vec(), b"a#2".to_vec(), b"a#3".to_vec()];
        let values = vec![Some(b"x".to_vec()), None, Some(b"z".to_vec())];

        assert_eq!(
            pair_values(keys, values),
            vec![
                (Bytes::from_static(b"a#1"), Bytes::from_static(b"x")),
                (Bytes::from_static(b"a#3"), Bytes::from_static(b"z")),
            ]
        );
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(matches!(
            RedisSession::open("redis://[::1"),
            Err(StoreError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn accepts_url_without_connecting() {
        assert!(RedisSession::open("redis://10.255.255.1:6379/").is_ok());
    }

    #[tokio::test]
    async fn refused_connect_fails_without_retrying() {
        let session = RedisSession::open("redis://127.0.0.1:1/").unwrap();

        let start = Instant::now();
        let result = session.create_client().await;

        assert!(matches!(result, Err(StoreError::Redis(_))));
        assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    }
}
