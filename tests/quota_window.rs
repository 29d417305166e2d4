//! Sliding-window quota semantics against an in-memory counter store that
//! honors the atomic evict-insert-count contract.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hexgate::{
    core::quota::{QuotaDecision, QuotaEngine},
    ports::counter_store::{CounterStore, CounterStoreError},
};

/// Sorted-set semantics in memory: duplicate members collapse, eviction is
/// by score, count is cardinality after insertion.
#[derive(Default)]
struct InMemoryCounterStore {
    sets: Mutex<HashMap<String, Vec<(i64, String)>>>,
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<u64, CounterStoreError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| CounterStoreError::Backend("lock poisoned".into()))?;
        let entries = sets.entry(key.to_string()).or_default();
        entries.retain(|(score, _)| *score > now_ms - window_ms);
        if !entries.iter().any(|(_, m)| m == member) {
            entries.push((now_ms, member.to_string()));
        }
        Ok(entries.len() as u64)
    }

    async fn ping(&self) -> Result<(), CounterStoreError> {
        Ok(())
    }
}

struct FailingCounterStore;

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn record_and_count(
        &self,
        _key: &str,
        _member: &str,
        _now_ms: i64,
        _window_ms: i64,
    ) -> Result<u64, CounterStoreError> {
        Err(CounterStoreError::Backend("connection reset".into()))
    }

    async fn ping(&self) -> Result<(), CounterStoreError> {
        Err(CounterStoreError::Backend("connection reset".into()))
    }
}

fn engine(limit: u64, period: Duration) -> QuotaEngine {
    QuotaEngine::new(Arc::new(InMemoryCounterStore::default()), limit, period)
}

#[tokio::test]
async fn admits_up_to_limit_within_one_millisecond() {
    let engine = engine(3, Duration::from_secs(1));

    // Same-millisecond admissions get distinct members, so each one counts.
    for i in 1..=3u64 {
        let decision = engine.admit_at("alice", 10_000).await.unwrap();
        assert_eq!(decision, QuotaDecision::Admitted { count: i });
    }

    let fourth = engine.admit_at("alice", 10_000).await.unwrap();
    assert_eq!(fourth, QuotaDecision::Denied { count: 4 });
}

#[tokio::test]
async fn window_slides_and_old_admissions_expire() {
    let engine = engine(3, Duration::from_secs(1));

    for _ in 0..3 {
        assert!(engine.admit_at("alice", 10_000).await.unwrap().is_admitted());
    }
    assert!(!engine.admit_at("alice", 10_020).await.unwrap().is_admitted());

    // 1.1s later the original burst has left the window.
    let decision = engine.admit_at("alice", 11_100).await.unwrap();
    assert_eq!(decision, QuotaDecision::Admitted { count: 1 });
}

#[tokio::test]
async fn entries_on_the_window_edge_are_evicted() {
    let engine = engine(1, Duration::from_secs(1));

    assert!(engine.admit_at("alice", 10_000).await.unwrap().is_admitted());
    // Exactly period later: the first admission is scored at
    // now - period and must be evicted before counting.
    let decision = engine.admit_at("alice", 11_000).await.unwrap();
    assert_eq!(decision, QuotaDecision::Admitted { count: 1 });
}

#[tokio::test]
async fn zero_limit_denies_everything() {
    let engine = engine(0, Duration::from_secs(1));
    let decision = engine.admit_at("alice", 10_000).await.unwrap();
    assert_eq!(decision, QuotaDecision::Denied { count: 1 });
}

#[tokio::test]
async fn subjects_are_counted_independently() {
    let engine = engine(1, Duration::from_secs(1));

    assert!(engine.admit_at("alice", 10_000).await.unwrap().is_admitted());
    assert!(!engine.admit_at("alice", 10_001).await.unwrap().is_admitted());
    assert!(engine.admit_at("bob", 10_002).await.unwrap().is_admitted());
}

#[tokio::test]
async fn store_failure_is_propagated_not_admitted() {
    let engine = QuotaEngine::new(Arc::new(FailingCounterStore), 3, Duration::from_secs(1));
    assert!(engine.admit("alice").await.is_err());
}

#[tokio::test]
async fn wall_clock_admit_counts_against_limit() {
    let engine = engine(2, Duration::from_secs(60));

    assert!(engine.admit("alice").await.unwrap().is_admitted());
    assert!(engine.admit("alice").await.unwrap().is_admitted());
    assert!(!engine.admit("alice").await.unwrap().is_admitted());
}
