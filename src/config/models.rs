//! Configuration data structures for HexGate.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files.
//! Field names follow the camelCase wire schema (`gatewayPort`,
//! `consulServiceName`, ...) and carry defaults so minimal configs remain
//! concise.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Cleartext listener port. When TLS is enabled this port only serves
    /// redirects to the HTTPS listener.
    pub gateway_port: String,
    pub services: Vec<ServiceSpec>,
    pub authentication: AuthConfig,
    /// Per-client-IP rate limiting applied in front of authentication.
    pub rate_limiting: RateLimitConfig,
    pub tls: TlsConfig,
    /// Counter store backing the distributed quota.
    pub redis: RedisConfig,
    pub consul: ConsulConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_port: "8000".to_string(),
            services: Vec::new(),
            authentication: AuthConfig::default(),
            rate_limiting: RateLimitConfig::default(),
            tls: TlsConfig::default(),
            redis: RedisConfig::default(),
            consul: ConsulConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Whether any service needs the counter store connected at startup.
    pub fn requires_counter_store(&self) -> bool {
        self.services
            .iter()
            .any(|s| s.quota.as_ref().is_some_and(|q| q.enabled))
    }
}

/// One routed service: path prefix in, discovered backend pool out.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSpec {
    pub name: String,
    /// Path prefix this service owns, e.g. `/users/`.
    pub path: String,
    /// Name the service is registered under in the discovery catalog.
    /// Empty means the entry is skipped with a warning.
    pub consul_service_name: String,
    pub quota: Option<QuotaPolicy>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: String::new(),
            consul_service_name: String::new(),
            quota: None,
        }
    }
}

/// Sliding-window quota for one service, keyed on the verified subject.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaPolicy {
    pub enabled: bool,
    /// Maximum admissions in any rolling window of `period`.
    pub limit: u64,
    /// Window length, parsed by humantime (e.g. "1s", "5m", "1h").
    pub period: String,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 0,
            period: "1s".to_string(),
        }
    }
}

impl QuotaPolicy {
    /// Parse the configured period, requiring a positive duration.
    pub fn window(&self) -> Result<Duration, String> {
        let period = humantime::parse_duration(&self.period)
            .map_err(|e| format!("invalid quota period '{}': {e}", self.period))?;
        if period.is_zero() {
            return Err(format!("quota period '{}' must be positive", self.period));
        }
        Ok(period)
    }
}

/// Bearer-token authentication settings.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// PEM file holding the PKIX-encoded RSA public key used to verify
    /// RS256 signatures.
    pub public_key_path: String,
}

/// Per-client-IP rate limiting in front of the auth/quota stages.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub rate_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_per_second: 10,
            burst: 20,
        }
    }
}

/// TLS termination settings for the public listener.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub https_port: String,
    /// Path to the PEM-encoded certificate chain.
    pub cert_file: String,
    /// Path to the PEM-encoded (PKCS#8) private key.
    pub key_file: String,
}

/// Counter store connection settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    pub address: String,
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
        }
    }
}

/// Discovery catalog endpoint.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsulConfig {
    pub address: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_window_parses_humantime() {
        let policy = QuotaPolicy {
            enabled: true,
            limit: 3,
            period: "1s".to_string(),
        };
        assert_eq!(policy.window().unwrap(), Duration::from_secs(1));

        let policy = QuotaPolicy {
            period: "5m".to_string(),
            ..policy
        };
        assert_eq!(policy.window().unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_quota_window_rejects_bad_periods() {
        let mut policy = QuotaPolicy {
            enabled: true,
            limit: 3,
            period: "soon".to_string(),
        };
        assert!(policy.window().is_err());

        policy.period = "0s".to_string();
        assert!(policy.window().is_err());
    }

    #[test]
    fn test_requires_counter_store() {
        let mut config = GatewayConfig::default();
        assert!(!config.requires_counter_store());

        config.services.push(ServiceSpec {
            name: "user-service".into(),
            path: "/users/".into(),
            consul_service_name: "user-service".into(),
            quota: Some(QuotaPolicy {
                enabled: false,
                ..QuotaPolicy::default()
            }),
        });
        assert!(!config.requires_counter_store());

        config.services[0].quota = Some(QuotaPolicy {
            enabled: true,
            limit: 3,
            period: "1s".into(),
        });
        assert!(config.requires_counter_store());
    }
}
