//! Per-service handler chain.
//!
//! Each routed service gets one `ServiceChain` composed at snapshot build
//! time. At request time the stages run strictly in this order:
//!
//! 1. metrics (observes every outcome, including 401/429/503)
//! 2. per-IP rate limit (when globally enabled)
//! 3. authentication (injects the verified [`crate::core::auth::VisitorClaim`])
//! 4. quota (keyed on the verified subject)
//! 5. forward (round-robin over the live backend pool)
//!
//! Auth must precede quota because the quota key is the verified subject;
//! the forwarder is never reached when any stage rejects.
use std::{net::SocketAddr, sync::Arc};

use axum::{body::Body, extract::ConnectInfo};
use http::{HeaderValue, Request, Response, StatusCode, Uri, header};

use crate::{
    core::{
        auth::TokenVerifier,
        backend::UpstreamUrl,
        pool::BackendPool,
        quota::{QuotaDecision, QuotaEngine},
        rate_limiter::VisitorRateLimiter,
    },
    metrics,
    ports::http_client::HttpClient,
};

/// Fully-composed handler chain for one service.
pub struct ServiceChain {
    service: String,
    pool: Arc<BackendPool>,
    http_client: Arc<dyn HttpClient>,
    verifier: Option<Arc<TokenVerifier>>,
    quota: Option<QuotaEngine>,
    ip_limiter: Option<Arc<VisitorRateLimiter>>,
}

impl ServiceChain {
    pub fn new(
        service: impl Into<String>,
        pool: Arc<BackendPool>,
        http_client: Arc<dyn HttpClient>,
        verifier: Option<Arc<TokenVerifier>>,
        quota: Option<QuotaEngine>,
        ip_limiter: Option<Arc<VisitorRateLimiter>>,
    ) -> Self {
        Self {
            service: service.into(),
            pool,
            http_client,
            verifier,
            quota,
            ip_limiter,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Run the full chain for one request. Metrics wrap everything so the
    /// counter and histogram see the final status of every request.
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().to_string();
        let timer = metrics::RequestTimer::new(&self.service, &method);

        let response = self.apply(req).await;

        metrics::increment_request_total(&self.service, &method, response.status().as_u16());
        drop(timer);
        response
    }

    /// Rate limit, auth and quota stages; any rejection short-circuits.
    async fn apply(&self, mut req: Request<Body>) -> Response<Body> {
        if let Some(limiter) = &self.ip_limiter {
            let client_ip = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip());
            // A request with no usable peer address is let through; the
            // quota stage still applies.
            if let Some(ip) = client_ip {
                if !limiter.check(ip) {
                    return plain_response(StatusCode::TOO_MANY_REQUESTS, "429 Too Many Requests");
                }
            }
        }

        let subject = match &self.verifier {
            Some(verifier) => match verifier.authorize(req.headers()) {
                Ok(claim) => {
                    let subject = claim.subject.clone();
                    req.extensions_mut().insert(claim);
                    Some(subject)
                }
                Err(e) => {
                    tracing::info!(service = %self.service, error = %e, "rejected bearer token");
                    return plain_response(StatusCode::UNAUTHORIZED, e.client_message());
                }
            },
            None => None,
        };

        if let Some(quota) = &self.quota {
            let Some(subject) = subject.as_deref() else {
                // Config validation forbids quota without auth; reaching
                // this arm means the invariant was broken upstream.
                tracing::error!(service = %self.service, "quota check without verified subject");
                return plain_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "500 Internal Server Error",
                );
            };
            match quota.admit(subject).await {
                Ok(QuotaDecision::Admitted { .. }) => {}
                Ok(QuotaDecision::Denied { .. }) => {
                    return plain_response(StatusCode::TOO_MANY_REQUESTS, "429 Too Many Requests");
                }
                Err(e) => {
                    tracing::error!(service = %self.service, error = %e, "counter store failure");
                    return plain_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "500 Internal Server Error",
                    );
                }
            }
        }

        self.forward(req).await
    }

    /// Pick the next live backend and proxy the request to it. A transport
    /// error trips the backend's error hook (liveness down) and answers 503.
    async fn forward(&self, mut req: Request<Body>) -> Response<Body> {
        let Some(backend) = self.pool.next() else {
            tracing::warn!(service = %self.service, "no live backends");
            return plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
        };

        if let Err(e) = rewrite_to_backend(&mut req, backend.url()) {
            tracing::error!(service = %self.service, error = %e, "failed to rewrite request URI");
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            );
        }

        tracing::debug!(service = %self.service, backend = %backend.url(), "forwarding request");

        match self.http_client.send_request(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(service = %self.service, backend = %backend.url(), error = %e, "backend error");
                backend.mark_failed();
                plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            }
        }
    }
}

/// Rewrite scheme/host/port of the request to the chosen backend, keeping
/// path and query intact, and record the original client in
/// `X-Forwarded-For`.
fn rewrite_to_backend(req: &mut Request<Body>, upstream: &UpstreamUrl) -> Result<(), http::Error> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri = Uri::builder()
        .scheme(upstream.scheme().clone())
        .authority(upstream.authority().clone())
        .path_and_query(path_and_query)
        .build()?;

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    if let Some(ip) = client_ip {
        let forwarded = match req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            req.headers_mut().insert("X-Forwarded-For", value);
        }
    }

    *req.uri_mut() = uri;
    Ok(())
}

/// Single-line plain-text response, the error surface for every rejecting
/// stage.
pub fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(message.to_string()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::from(message.to_string()));
            *response.status_mut() = status;
            response
        })
}
