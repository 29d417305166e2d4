//! Redis adapter for the [`CounterStore`] port.
//!
//! The sliding-window bookkeeping runs as one MULTI/EXEC transaction
//! against a per-subject sorted set: evict expired members by score,
//! insert the new admission, read the cardinality, renew the TTL. The
//! connection manager multiplexes a single connection and reconnects on
//! failure, so the handle is process-wide and survives config reloads.
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::{
    config::models::RedisConfig,
    ports::counter_store::{CounterStore, CounterStoreError},
};

impl From<redis::RedisError> for CounterStoreError {
    fn from(e: redis::RedisError) -> Self {
        CounterStoreError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect and eagerly ping; a store that cannot answer at startup is
    /// a fatal configuration problem.
    pub async fn connect(config: &RedisConfig) -> Result<Self, CounterStoreError> {
        let url = Self::connection_url(config);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| CounterStoreError::InvalidAddress(e.to_string()))?;
        let manager = client.get_connection_manager().await?;

        let store = Self { manager };
        store.ping().await?;
        tracing::info!(address = %config.address, db = config.db, "connected to counter store");
        Ok(store)
    }

    fn connection_url(config: &RedisConfig) -> String {
        if config.password.is_empty() {
            format!("redis://{}/{}", config.address, config.db)
        } else {
            format!("redis://:{}@{}/{}", config.password, config.address, config.db)
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<u64, CounterStoreError> {
        let min_score = now_ms - window_ms;
        let mut conn = self.manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, min_score)
            .ignore()
            .zadd(key, member, now_ms)
            .ignore()
            .zcard(key)
            .pexpire(key, window_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), CounterStoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_variants() {
        let config = RedisConfig {
            address: "127.0.0.1:6379".into(),
            password: String::new(),
            db: 0,
        };
        assert_eq!(
            RedisCounterStore::connection_url(&config),
            "redis://127.0.0.1:6379/0"
        );

        let config = RedisConfig {
            password: "hunter2".into(),
            db: 3,
            ..config
        };
        assert_eq!(
            RedisCounterStore::connection_url(&config),
            "redis://:hunter2@127.0.0.1:6379/3"
        );
    }
}
