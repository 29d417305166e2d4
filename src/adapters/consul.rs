//! Consul health-endpoint adapter for the [`ServiceCatalog`] port.
//!
//! Uses Consul's blocking queries: each call passes the last seen change
//! index and the HTTP request parks on the agent until the index moves or
//! the server-side wait expires. The client-side timeout is the wait plus
//! a grace period, bounding a hung poll.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use http_body_util::BodyExt;
use hyper::Request;
use serde::Deserialize;

use crate::ports::{
    catalog::{CatalogError, CatalogUpdate, ServiceCatalog, ServiceInstance},
    http_client::HttpClient,
};

/// Server-side maximum a blocking query may park.
const BLOCKING_WAIT: Duration = Duration::from_secs(300);
/// Extra client-side allowance on top of the server-side wait.
const WAIT_GRACE: Duration = Duration::from_secs(30);

/// Health-query view of a Consul agent.
pub struct ConsulCatalog {
    base_url: String,
    client: Arc<dyn HttpClient>,
}

impl ConsulCatalog {
    /// `base_url` is the agent address, e.g. `http://127.0.0.1:8500`.
    pub fn new(base_url: impl Into<String>, client: Arc<dyn HttpClient>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    service: AgentService,
    node: NodeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[async_trait]
impl ServiceCatalog for ConsulCatalog {
    async fn healthy_instances(
        &self,
        service: &str,
        wait_index: u64,
    ) -> Result<CatalogUpdate, CatalogError> {
        let uri = format!(
            "{}/v1/health/service/{}?passing=true&index={}&wait={}s",
            self.base_url,
            service,
            wait_index,
            BLOCKING_WAIT.as_secs()
        );

        let req = Request::builder()
            .uri(&uri)
            .body(Body::empty())
            .map_err(|e| CatalogError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(
            BLOCKING_WAIT + WAIT_GRACE,
            self.client.send_request(req),
        )
        .await
        .map_err(|_| CatalogError::Transport(format!("blocking query to {uri} timed out")))?
        .map_err(|e| CatalogError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::Status(response.status().as_u16()));
        }

        let index = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(wait_index);

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| CatalogError::Transport(e.to_string()))?
            .to_bytes();

        let entries: Vec<HealthEntry> = serde_json::from_slice(&body)?;
        let instances = entries
            .into_iter()
            .map(|entry| ServiceInstance {
                id: entry.service.id,
                address: entry.service.address,
                port: entry.service.port,
                node_address: entry.node.address,
            })
            .collect();

        Ok(CatalogUpdate { instances, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_entry_decoding() {
        let payload = r#"
        [
          {
            "Node": {"Node": "agent-1", "Address": "10.0.0.1"},
            "Service": {"ID": "user-service-1", "Service": "user-service", "Address": "10.0.0.4", "Port": 8081},
            "Checks": [{"Status": "passing"}]
          },
          {
            "Node": {"Node": "agent-2", "Address": "10.0.0.2"},
            "Service": {"ID": "user-service-2", "Service": "user-service", "Address": "", "Port": 8082},
            "Checks": [{"Status": "passing"}]
          }
        ]"#;

        let entries: Vec<HealthEntry> = serde_json::from_str(payload).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service.id, "user-service-1");
        assert_eq!(entries[0].service.address, "10.0.0.4");

        // Empty service address falls back to the node address.
        let instance = ServiceInstance {
            id: entries[1].service.id.clone(),
            address: entries[1].service.address.clone(),
            port: entries[1].service.port,
            node_address: entries[1].node.address.clone(),
        };
        assert_eq!(instance.url(), "http://10.0.0.2:8082");
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        struct NoopClient;

        #[async_trait]
        impl HttpClient for NoopClient {
            async fn send_request(
                &self,
                _req: Request<Body>,
            ) -> crate::ports::http_client::HttpClientResult<hyper::Response<Body>> {
                unreachable!("not exercised")
            }
        }

        let catalog = ConsulCatalog::new("http://127.0.0.1:8500/", Arc::new(NoopClient));
        assert_eq!(catalog.base_url, "http://127.0.0.1:8500");
    }
}
