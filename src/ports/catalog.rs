use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by the discovery catalog. The watcher treats all of
/// them the same way: log, back off, retry.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("Discovery transport error: {0}")]
    Transport(String),

    #[error("Discovery returned status {0}")]
    Status(u16),

    #[error("Failed to decode discovery response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One healthy instance as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    /// Stable instance id, unique within the service.
    pub id: String,
    /// Service-level address; may be empty, in which case the node
    /// address is the fallback.
    pub address: String,
    pub port: u16,
    /// Address of the node hosting the instance.
    pub node_address: String,
}

impl ServiceInstance {
    /// Upstream URL for this instance, using the node address when the
    /// service address is empty.
    pub fn url(&self) -> String {
        let host = if self.address.is_empty() {
            &self.node_address
        } else {
            &self.address
        };
        format!("http://{}:{}", host, self.port)
    }
}

/// Result of one long-poll round: the healthy instance list and the
/// change index to hand back on the next call.
#[derive(Debug, Clone)]
pub struct CatalogUpdate {
    pub instances: Vec<ServiceInstance>,
    pub index: u64,
}

/// Blocking-query view of an external service-discovery catalog.
#[async_trait]
pub trait ServiceCatalog: Send + Sync + 'static {
    /// Return the current healthy instances of `service`, blocking until
    /// the catalog's change index moves past `wait_index` (or the
    /// catalog-side wait expires and the unchanged list is returned).
    async fn healthy_instances(
        &self,
        service: &str,
        wait_index: u64,
    ) -> Result<CatalogUpdate, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_url_prefers_service_address() {
        let instance = ServiceInstance {
            id: "u1".into(),
            address: "10.0.0.4".into(),
            port: 8081,
            node_address: "10.0.0.1".into(),
        };
        assert_eq!(instance.url(), "http://10.0.0.4:8081");
    }

    #[test]
    fn test_instance_url_falls_back_to_node_address() {
        let instance = ServiceInstance {
            id: "u1".into(),
            address: String::new(),
            port: 8081,
            node_address: "10.0.0.1".into(),
        };
        assert_eq!(instance.url(), "http://10.0.0.1:8081");
    }
}
