use thiserror::Error;

/// Errors raised at the key-value store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured address does not name a supported store.
    #[error("invalid store address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A connection or command failure reported by the Redis client.
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// A failure injected into the in-memory store.
    #[error("injected {0} failure")]
    Injected(&'static str),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
