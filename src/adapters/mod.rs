pub mod consul;
pub mod file_config;
pub mod http_client;
pub mod redis_store;

/// Re-export commonly used types from adapters
pub use consul::ConsulCatalog;
pub use file_config::FileConfigProvider;
pub use http_client::HttpClientAdapter;
pub use redis_store::RedisCounterStore;
