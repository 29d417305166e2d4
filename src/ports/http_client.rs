use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Errors for HTTP egress to upstream backends.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Transport-level failure (connect, reset, TLS). The forwarder treats
    /// this as the backend's fault and demotes it.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The outgoing request could not be constructed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for forwarding a request to an upstream backend.
///
/// Implementations stream both bodies and must not buffer them. Dropping
/// the returned future cancels the upstream exchange, which is how client
/// disconnects propagate.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;
}
