//! Discovery watcher: mirrors the external catalog into a backend pool.
//!
//! One watcher binds one discovery service name to one [`BackendPool`] and
//! runs as a long-lived task beside the request handlers. It never blocks
//! the request path; readers may observe an intermediate membership while
//! a reconciliation is underway (atomicity is per id, not per snapshot).
use std::{collections::HashSet, sync::Arc, time::Duration};

use crate::{
    core::pool::{BackendPool, PoolError},
    ports::catalog::{ServiceCatalog, ServiceInstance},
};

/// Fixed back-off between failed catalog polls.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

pub struct DiscoveryWatcher {
    catalog: Arc<dyn ServiceCatalog>,
    service_name: String,
    pool: Arc<BackendPool>,
}

impl DiscoveryWatcher {
    pub fn new(
        catalog: Arc<dyn ServiceCatalog>,
        service_name: impl Into<String>,
        pool: Arc<BackendPool>,
    ) -> Self {
        Self {
            catalog,
            service_name: service_name.into(),
            pool,
        }
    }

    /// Long-poll loop. Runs until the owning snapshot is dropped and the
    /// task is aborted.
    pub async fn run(self) {
        tracing::info!(service = %self.service_name, "starting discovery watcher");
        let mut last_index = 0u64;

        loop {
            match self
                .catalog
                .healthy_instances(&self.service_name, last_index)
                .await
            {
                Ok(update) => {
                    last_index = update.index;
                    tracing::debug!(
                        service = %self.service_name,
                        index = last_index,
                        instances = update.instances.len(),
                        "discovery update"
                    );
                    self.reconcile(&update.instances);
                }
                Err(e) => {
                    tracing::warn!(
                        service = %self.service_name,
                        error = %e,
                        "discovery poll failed, retrying in {}s",
                        RETRY_BACKOFF.as_secs()
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// Bring pool membership in line with the reported instance list:
    /// add newcomers, remove the vanished, and re-promote survivors that a
    /// transport error may have demoted.
    pub fn reconcile(&self, instances: &[ServiceInstance]) {
        let listed: HashSet<&str> = instances.iter().map(|i| i.id.as_str()).collect();
        let current: HashSet<String> = self.pool.ids().into_iter().collect();

        for instance in instances {
            if current.contains(&instance.id) {
                self.pool.mark_alive(&instance.id, true);
            } else {
                match self.pool.add(&instance.id, &instance.url()) {
                    Ok(()) => {}
                    // Duplicate can only happen when two reconciliations
                    // race; the existing entry wins.
                    Err(PoolError::Duplicate(id)) => {
                        tracing::debug!(backend_id = %id, "backend already present");
                    }
                    Err(e) => {
                        tracing::warn!(
                            service = %self.service_name,
                            backend_id = %instance.id,
                            error = %e,
                            "failed to add backend"
                        );
                    }
                }
            }
        }

        for id in current {
            if !listed.contains(id.as_str()) {
                self.pool.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::ports::catalog::{CatalogError, CatalogUpdate};

    struct StaticCatalog;

    #[async_trait]
    impl ServiceCatalog for StaticCatalog {
        async fn healthy_instances(
            &self,
            _service: &str,
            _wait_index: u64,
        ) -> Result<CatalogUpdate, CatalogError> {
            Ok(CatalogUpdate {
                instances: Vec::new(),
                index: 1,
            })
        }
    }

    fn instance(id: &str, port: u16) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            address: "127.0.0.1".to_string(),
            port,
            node_address: "127.0.0.1".to_string(),
        }
    }

    fn watcher() -> (DiscoveryWatcher, Arc<BackendPool>) {
        let pool = Arc::new(BackendPool::new());
        let watcher = DiscoveryWatcher::new(Arc::new(StaticCatalog), "user-service", pool.clone());
        (watcher, pool)
    }

    #[test]
    fn test_reconcile_adds_new_instances() {
        let (watcher, pool) = watcher();
        watcher.reconcile(&[instance("u1", 8081), instance("u2", 8082)]);

        let mut ids = pool.ids();
        ids.sort();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[test]
    fn test_reconcile_removes_vanished_instances() {
        let (watcher, pool) = watcher();
        watcher.reconcile(&[instance("u1", 8081), instance("u2", 8082)]);
        watcher.reconcile(&[instance("u2", 8082)]);

        assert_eq!(pool.ids(), vec!["u2"]);
    }

    #[test]
    fn test_reconcile_revives_demoted_survivors() {
        let (watcher, pool) = watcher();
        watcher.reconcile(&[instance("u1", 8081)]);

        // Transport error demotes the backend; it must stay unselectable
        // until the next discovery pass re-lists it.
        pool.next().unwrap().mark_failed();
        assert!(pool.next().is_none());

        watcher.reconcile(&[instance("u1", 8081)]);
        assert_eq!(pool.next().unwrap().id(), "u1");
    }

    #[test]
    fn test_reconcile_add_then_remove_not_dispatchable() {
        let (watcher, pool) = watcher();
        watcher.reconcile(&[instance("u1", 8081)]);
        watcher.reconcile(&[]);

        assert!(pool.next().is_none());
        assert!(pool.is_empty());
    }
}
