use std::collections::HashSet;

use crate::config::models::{GatewayConfig, ServiceSpec};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error(
        "Service '{service}' declares a quota but authentication is disabled; \
         quota is keyed on the verified subject"
    )]
    QuotaWithoutAuth { service: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator enforcing cross-field constraints
/// before a snapshot is built from the config.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_port(&config.gateway_port, "gatewayPort") {
            errors.push(e);
        }

        let mut seen_prefixes = HashSet::new();
        for service in &config.services {
            if let Err(mut service_errors) = Self::validate_service(service, config) {
                errors.append(&mut service_errors);
            }
            if !service.path.is_empty() && !seen_prefixes.insert(service.path.clone()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!("duplicate path prefix '{}'", service.path),
                });
            }
        }

        if config.authentication.enabled && config.authentication.public_key_path.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "authentication.publicKeyPath".to_string(),
            });
        }

        if config.rate_limiting.enabled {
            if config.rate_limiting.rate_per_second == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "rateLimiting.ratePerSecond".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
            if config.rate_limiting.burst == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "rateLimiting.burst".to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if config.tls.enabled {
            if let Err(e) = Self::validate_tls(config) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_port(port: &str, field: &str) -> ValidationResult<()> {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => Ok(()),
            _ => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{port}' is not a valid port number"),
            }),
        }
    }

    fn validate_service(
        service: &ServiceSpec,
        config: &GatewayConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if service.name.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services[].name".to_string(),
            });
        }

        if !service.path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' path", service.name),
                message: "path prefixes must start with '/'".to_string(),
            });
        }

        if let Some(quota) = service.quota.as_ref().filter(|q| q.enabled) {
            if !config.authentication.enabled {
                errors.push(ValidationError::QuotaWithoutAuth {
                    service: service.name.clone(),
                });
            }
            if let Err(message) = quota.window() {
                errors.push(ValidationError::InvalidField {
                    field: format!("service '{}' quota.period", service.name),
                    message,
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_tls(config: &GatewayConfig) -> ValidationResult<()> {
        if !matches!(config.tls.https_port.parse::<u16>(), Ok(p) if p > 0) {
            return Err(ValidationError::InvalidTls {
                message: format!("'{}' is not a valid HTTPS port", config.tls.https_port),
            });
        }
        if config.tls.cert_file.is_empty() || config.tls.key_file.is_empty() {
            return Err(ValidationError::InvalidTls {
                message: "certFile and keyFile are required when TLS is enabled".to_string(),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {}", i + 1, e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
