//! Cache tier: a key-value store with TTL, gated by a `should_cache` size
//! policy so that only small factorials (whose decimal form is cheap to
//! keep hot) are ever written.

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const KEY_PREFIX: &str = "factorial:";

/// Read/write timeout for cache operations; exceeding it is treated as a
/// transient failure by the caller.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// `true` iff `0 <= n < threshold`. Negative or unparseable inputs (modeled
/// here as `i64` so the negative case is representable) always yield
/// `false`.
pub fn should_cache_signed(n: i64, threshold: u64) -> bool {
    n >= 0 && (n as u64) < threshold
}

fn format_key(number: u64) -> String {
    format!("{KEY_PREFIX}{number}")
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// `true` iff `number` is small enough to be worth caching.
    fn should_cache(&self, number: u64) -> bool;

    /// Returns the cached decimal body, or the empty string on a cache miss.
    /// A miss is not an error; only infrastructure failures are.
    async fn get(&self, number: u64) -> Result<String, CacheError>;

    /// Writes `body` with TTL if `should_cache(number)`; a no-op otherwise.
    /// Write failures are logged and swallowed — the cache is optional, and
    /// callers fall back to the artifact store on a subsequent miss.
    async fn set(&self, number: u64, body: &str);
}

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
    ttl: Duration,
    threshold: u64,
}

impl RedisCache {
    pub async fn connect(url: &str, ttl: Duration, threshold: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(RedisCache { conn, ttl, threshold })
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn should_cache(&self, number: u64) -> bool {
        number < self.threshold
    }

    async fn get(&self, number: u64) -> Result<String, CacheError> {
        use redis::AsyncCommands;
        let key = format_key(number);
        let mut conn = self.conn.clone();
        let fut = conn.get::<_, Option<String>>(&key);
        let value = tokio::time::timeout(OPERATION_TIMEOUT, fut)
            .await
            .map_err(|_| CacheError::Timeout(OPERATION_TIMEOUT))??;
        Ok(value.unwrap_or_default())
    }

    async fn set(&self, number: u64, body: &str) {
        if !self.should_cache(number) {
            return;
        }
        use redis::AsyncCommands;
        let key = format_key(number);
        let mut conn = self.conn.clone();
        let fut = conn.set_ex::<_, _, ()>(&key, body, self.ttl.as_secs());
        match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("cache write failed for number {number}: {e}"),
            Err(_) => log::warn!("cache write timed out for number {number}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_cache_is_true_iff_within_threshold() {
        assert!(should_cache_signed(0, 1000));
        assert!(should_cache_signed(999, 1000));
        assert!(!should_cache_signed(1000, 1000));
        assert!(!should_cache_signed(-1, 1000));
    }

    #[test]
    fn key_format_is_prefixed() {
        assert_eq!(format_key(42), "factorial:42");
    }
}
