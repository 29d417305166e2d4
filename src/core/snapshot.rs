//! Router snapshot: one configuration generation's routing graph.
//!
//! A snapshot is built fresh on every (re)load and published through an
//! `ArcSwap`. Request handlers load the current snapshot once per request
//! and keep it alive for the request's duration, so a reload never
//! interrupts in-flight traffic. Dropping a snapshot aborts its discovery
//! watchers, which happens only after the last request holding it
//! completes.
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    config::models::GatewayConfig,
    config::validation::{GatewayConfigValidator, ValidationError},
    core::{
        auth::{AuthError, TokenVerifier},
        chain::ServiceChain,
        pool::BackendPool,
        quota::QuotaEngine,
        rate_limiter::VisitorRateLimiter,
        watcher::DiscoveryWatcher,
    },
    ports::{counter_store::CounterStore, catalog::ServiceCatalog, http_client::HttpClient},
};

/// How often idle per-IP rate-limit state is evicted.
const LIMITER_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Failed to load authentication key: {0}")]
    AuthKey(#[from] AuthError),

    #[error("Service '{service}': {message}")]
    InvalidQuota { service: String, message: String },

    #[error("Service '{service}' declares a quota but no counter store is connected")]
    CounterStoreUnavailable { service: String },

    #[error("Failed to build rate limiter: {0}")]
    RateLimiter(String),
}

struct RouteEntry {
    prefix: String,
    chain: ServiceChain,
}

/// Immutable routing graph for one configuration generation.
pub struct RouterSnapshot {
    routes: Vec<RouteEntry>,
    background: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RouterSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterSnapshot")
            .field("routes", &self.routes.iter().map(|r| &r.prefix).collect::<Vec<_>>())
            .finish()
    }
}

impl RouterSnapshot {
    /// Build a snapshot from a validated configuration, starting one
    /// discovery watcher per routed service. Must run inside a tokio
    /// runtime.
    ///
    /// Any failure leaves no running tasks behind: watchers spawned before
    /// the error are aborted when the partially built snapshot drops.
    pub fn build(
        config: &GatewayConfig,
        catalog: Arc<dyn ServiceCatalog>,
        counter_store: Option<Arc<dyn CounterStore>>,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self, SnapshotError> {
        GatewayConfigValidator::validate(config)?;

        let verifier = if config.authentication.enabled {
            let verifier = TokenVerifier::from_pem_file(&config.authentication.public_key_path)?;
            tracing::info!(
                key_path = %config.authentication.public_key_path,
                "loaded RSA public key for token validation"
            );
            Some(Arc::new(verifier))
        } else {
            None
        };

        let mut snapshot = Self {
            routes: Vec::new(),
            background: Vec::new(),
        };
        let mut limiters: Vec<Arc<VisitorRateLimiter>> = Vec::new();

        for service in &config.services {
            if service.consul_service_name.is_empty() {
                tracing::warn!(
                    service = %service.name,
                    "skipping service: missing 'consulServiceName'"
                );
                continue;
            }

            let pool = Arc::new(BackendPool::new());
            let watcher = DiscoveryWatcher::new(
                catalog.clone(),
                service.consul_service_name.clone(),
                pool.clone(),
            );
            snapshot.background.push(tokio::spawn(watcher.run()));

            let quota = match service.quota.as_ref().filter(|q| q.enabled) {
                Some(policy) => {
                    let store = counter_store.clone().ok_or_else(|| {
                        SnapshotError::CounterStoreUnavailable {
                            service: service.name.clone(),
                        }
                    })?;
                    let period =
                        policy
                            .window()
                            .map_err(|message| SnapshotError::InvalidQuota {
                                service: service.name.clone(),
                                message,
                            })?;
                    tracing::info!(
                        service = %service.name,
                        limit = policy.limit,
                        period = %policy.period,
                        "enabling quota"
                    );
                    Some(QuotaEngine::new(store, policy.limit, period))
                }
                None => None,
            };

            let ip_limiter = if config.rate_limiting.enabled {
                let limiter = Arc::new(
                    VisitorRateLimiter::new(&config.rate_limiting)
                        .map_err(SnapshotError::RateLimiter)?,
                );
                limiters.push(limiter.clone());
                Some(limiter)
            } else {
                None
            };

            snapshot.routes.push(RouteEntry {
                prefix: service.path.clone(),
                chain: ServiceChain::new(
                    service.name.clone(),
                    pool,
                    http_client.clone(),
                    verifier.clone(),
                    quota,
                    ip_limiter,
                ),
            });
            tracing::info!(service = %service.name, path = %service.path, "registered handler");
        }

        if !limiters.is_empty() {
            snapshot.background.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(LIMITER_JANITOR_INTERVAL);
                loop {
                    tick.tick().await;
                    for limiter in &limiters {
                        limiter.shrink();
                    }
                }
            }));
        }

        Ok(snapshot)
    }

    /// Longest-prefix match over the configured service paths.
    pub fn find_chain(&self, path: &str) -> Option<&ServiceChain> {
        self.routes
            .iter()
            .filter(|entry| path.starts_with(&entry.prefix))
            .max_by_key(|entry| entry.prefix.len())
            .map(|entry| &entry.chain)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Drop for RouterSnapshot {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}
