pub mod auth;
pub mod backend;
pub mod chain;
pub mod pool;
pub mod quota;
pub mod rate_limiter;
pub mod snapshot;
pub mod watcher;

pub use auth::{AuthError, TokenVerifier, VisitorClaim};
pub use backend::{Backend, UpstreamUrl};
pub use chain::ServiceChain;
pub use pool::BackendPool;
pub use quota::{QuotaDecision, QuotaEngine};
pub use rate_limiter::VisitorRateLimiter;
pub use snapshot::{RouterSnapshot, SnapshotError};
pub use watcher::DiscoveryWatcher;
