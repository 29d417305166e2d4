use async_trait::async_trait;
use thiserror::Error;

/// Errors from the external counter store. A failed quota check answers
/// the client with 500 and never admits.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CounterStoreError {
    #[error("Counter store command failed: {0}")]
    Backend(String),

    #[error("Invalid counter store address: {0}")]
    InvalidAddress(String),
}

/// Atomic multi-operation counter used by the sliding-window quota.
///
/// All four steps (evict, insert, count, renew TTL) commit or fail as a
/// unit inside the store.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Against `key`: drop every entry scored at or before
    /// `now_ms - window_ms`, insert `member` scored `now_ms`, renew the
    /// key's TTL to `window_ms`, and return the post-insertion cardinality.
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<u64, CounterStoreError>;

    /// Liveness probe used once at startup.
    async fn ping(&self) -> Result<(), CounterStoreError>;
}
