//! Sliding-window quota over the external counter store.
//!
//! A subject is allowed at most `limit` admissions in any rolling window
//! of `period` ending now. The current request is counted before the
//! decision, so the admission threshold is `count <= limit` after
//! insertion. Same-millisecond admissions get distinct members (a nonce is
//! appended to the timestamp) so bursts are counted individually.
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use uuid::Uuid;

use crate::ports::counter_store::{CounterStore, CounterStoreError};

/// Outcome of a quota check. `count` is the post-insertion cardinality of
/// the subject's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Admitted { count: u64 },
    Denied { count: u64 },
}

impl QuotaDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, QuotaDecision::Admitted { .. })
    }
}

/// Per-service quota engine. Cheap to clone; the store handle is shared.
#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<dyn CounterStore>,
    limit: u64,
    period: Duration,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, period: Duration) -> Self {
        Self {
            store,
            limit,
            period,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run the atomic evict-insert-count-expire sequence for `subject`
    /// at the current wall-clock time.
    pub async fn admit(&self, subject: &str) -> Result<QuotaDecision, CounterStoreError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        self.admit_at(subject, now_ms).await
    }

    /// Admission decision at an explicit timestamp (milliseconds since the
    /// Unix epoch). Split out so the window arithmetic is testable.
    pub async fn admit_at(
        &self,
        subject: &str,
        now_ms: i64,
    ) -> Result<QuotaDecision, CounterStoreError> {
        let key = format!("quota:{subject}");
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());
        let window_ms = self.period.as_millis() as i64;

        let count = self
            .store
            .record_and_count(&key, &member, now_ms, window_ms)
            .await?;

        if count > self.limit {
            tracing::info!(subject, count, limit = self.limit, "quota exceeded");
            Ok(QuotaDecision::Denied { count })
        } else {
            Ok(QuotaDecision::Admitted { count })
        }
    }
}
