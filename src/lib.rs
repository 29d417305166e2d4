//! HexGate - an HTTP/HTTPS API gateway for dynamically discovered
//! microservice fleets.
//!
//! HexGate terminates client traffic, applies cross-cutting policies and
//! forwards requests by path prefix to one of several discovered upstream
//! instances. This library exposes the building blocks so the gateway can
//! be embedded or partially reused.
//!
//! # Features
//! - Path-prefix routing over per-service backend pools
//! - Live pool membership mirrored from a Consul catalog via blocking
//!   long-polls
//! - Round-robin backend selection with skip-dead failover
//! - RS256 bearer-token authentication injecting the caller identity
//! - Distributed sliding-window quotas over Redis, keyed on the verified
//!   subject
//! - Per-client-IP rate limiting in front of authentication
//! - Prometheus metrics (`/metrics`) & structured tracing via `tracing`
//! - Live configuration hot-reload with atomic router snapshot swaps
//! - TLS termination with cleartext-to-HTTPS redirects
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters**
//! (implementations) while keeping business logic inside `core`. A request
//! flows: listener → current [`core::RouterSnapshot`] (one atomic load per
//! request) → per-service chain (metrics → rate limit → auth → quota →
//! forward) → backend pool → upstream.
//!
//! Snapshots are immutable; a configuration reload builds a fresh snapshot
//! and publishes it atomically while in-flight requests finish against the
//! one they loaded.
//!
//! # Error Handling
//! Application-level fallible APIs return `eyre::Result<T>`; domain types
//! carry their own error enums.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod redirect;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the types the binary crate (and embedders) reach for.
pub use crate::{
    adapters::{ConsulCatalog, FileConfigProvider, HttpClientAdapter, RedisCounterStore},
    config::models::GatewayConfig,
    core::{BackendPool, QuotaEngine, RouterSnapshot, ServiceChain, TokenVerifier},
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
