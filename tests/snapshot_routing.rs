//! Router snapshot construction and dispatch-table behavior: prefix
//! matching, validation refusals, and discovery-driven pool membership.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, StatusCode};
use hexgate::{
    config::models::{AuthConfig, GatewayConfig, QuotaPolicy, ServiceSpec},
    core::snapshot::{RouterSnapshot, SnapshotError},
    ports::{
        catalog::{CatalogError, CatalogUpdate, ServiceCatalog, ServiceInstance},
        counter_store::{CounterStore, CounterStoreError},
        http_client::{HttpClient, HttpClientResult},
    },
};

/// Catalog mock: serves a fixed instance list per service. The first poll
/// returns immediately; later polls park like a real blocking query.
struct FixedCatalog {
    services: Mutex<HashMap<String, Vec<ServiceInstance>>>,
}

impl FixedCatalog {
    fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    fn with_service(self, name: &str, instances: Vec<ServiceInstance>) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(name.to_string(), instances);
        self
    }
}

#[async_trait]
impl ServiceCatalog for FixedCatalog {
    async fn healthy_instances(
        &self,
        service: &str,
        wait_index: u64,
    ) -> Result<CatalogUpdate, CatalogError> {
        if wait_index > 0 {
            // Nothing will change; park like a blocking query does.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let instances = self
            .services
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default();
        Ok(CatalogUpdate {
            instances,
            index: wait_index + 1,
        })
    }
}

struct NoopClient;

#[async_trait]
impl HttpClient for NoopClient {
    async fn send_request(&self, _req: Request<Body>) -> HttpClientResult<Response<Body>> {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap())
    }
}

struct NoopStore;

#[async_trait]
impl CounterStore for NoopStore {
    async fn record_and_count(
        &self,
        _key: &str,
        _member: &str,
        _now_ms: i64,
        _window_ms: i64,
    ) -> Result<u64, CounterStoreError> {
        Ok(1)
    }

    async fn ping(&self) -> Result<(), CounterStoreError> {
        Ok(())
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

fn service(name: &str, path: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        path: path.to_string(),
        consul_service_name: name.to_string(),
        quota: None,
    }
}

fn config_with(services: Vec<ServiceSpec>) -> GatewayConfig {
    GatewayConfig {
        services,
        ..GatewayConfig::default()
    }
}

fn build(config: &GatewayConfig) -> Result<RouterSnapshot, SnapshotError> {
    RouterSnapshot::build(
        config,
        Arc::new(FixedCatalog::new()),
        None,
        Arc::new(NoopClient),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn longest_prefix_wins() {
    let config = config_with(vec![
        service("user-service", "/users/"),
        service("user-admin", "/users/admin/"),
        service("product-service", "/products/"),
    ]);
    let snapshot = build(&config).unwrap();
    assert_eq!(snapshot.route_count(), 3);

    assert_eq!(
        snapshot.find_chain("/users/1").unwrap().service(),
        "user-service"
    );
    assert_eq!(
        snapshot.find_chain("/users/admin/1").unwrap().service(),
        "user-admin"
    );
    assert_eq!(
        snapshot.find_chain("/products/abc").unwrap().service(),
        "product-service"
    );
    assert!(snapshot.find_chain("/orders/1").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn service_without_discovery_name_is_skipped() {
    let mut orphan = service("orphan", "/orphan/");
    orphan.consul_service_name = String::new();
    let config = config_with(vec![service("user-service", "/users/"), orphan]);

    let snapshot = build(&config).unwrap();
    assert_eq!(snapshot.route_count(), 1);
    assert!(snapshot.find_chain("/orphan/x").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_without_auth_refuses_to_build() {
    let mut spec = service("user-service", "/users/");
    spec.quota = Some(QuotaPolicy {
        enabled: true,
        limit: 3,
        period: "1s".to_string(),
    });
    let config = config_with(vec![spec]);

    let err = RouterSnapshot::build(
        &config,
        Arc::new(FixedCatalog::new()),
        Some(Arc::new(NoopStore)),
        Arc::new(NoopClient),
    )
    .unwrap_err();
    assert!(err.to_string().contains("authentication is disabled"));
}

#[tokio::test(flavor = "multi_thread")]
async fn quota_without_counter_store_refuses_to_build() {
    let mut spec = service("user-service", "/users/");
    spec.quota = Some(QuotaPolicy {
        enabled: true,
        limit: 3,
        period: "1s".to_string(),
    });
    let mut config = config_with(vec![spec]);
    config.authentication = AuthConfig {
        enabled: true,
        public_key_path: "tests/data/jwt_test.pub".to_string(),
    };

    let err = build(&config).unwrap_err();
    assert!(matches!(
        err,
        SnapshotError::CounterStoreUnavailable { .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn auth_enabled_loads_public_key() {
    let mut config = config_with(vec![service("user-service", "/users/")]);
    config.authentication = AuthConfig {
        enabled: true,
        public_key_path: "tests/data/jwt_test.pub".to_string(),
    };
    assert!(build(&config).is_ok());

    config.authentication.public_key_path = "tests/data/no_such_key.pub".to_string();
    assert!(matches!(
        build(&config).unwrap_err(),
        SnapshotError::AuthKey(_)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_fills_the_pool_behind_the_chain() {
    let catalog = Arc::new(
        FixedCatalog::new().with_service(
            "user-service",
            vec![instance("u1", 8081), instance("u2", 8082)],
        ),
    );
    let config = config_with(vec![service("user-service", "/users/")]);
    let snapshot =
        RouterSnapshot::build(&config, catalog, None, Arc::new(NoopClient)).unwrap();

    // The watcher runs in the background; give its first poll a moment.
    let pool = snapshot.find_chain("/users/1").unwrap().pool().clone();
    for _ in 0..50 {
        if pool.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut ids = pool.ids();
    ids.sort();
    assert_eq!(ids, vec!["u1", "u2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rebuilds_from_unchanged_config_are_equivalent() {
    let config = config_with(vec![
        service("user-service", "/users/"),
        service("product-service", "/products/"),
    ]);

    let first = build(&config).unwrap();
    let second = build(&config).unwrap();
    assert_eq!(first.route_count(), second.route_count());

    // Old snapshot goes away; the new one still routes.
    drop(first);
    assert_eq!(
        second.find_chain("/users/1").unwrap().service(),
        "user-service"
    );
}
