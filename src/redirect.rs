//! Cleartext-to-HTTPS redirect front-end.
//!
//! When TLS is enabled the configured gateway port stops serving traffic
//! and only answers 301 redirects to the HTTPS authority, preserving path
//! and query string.
use axum::body::Body;
use http::{HeaderValue, Request, Response, StatusCode, header};

use crate::core::chain::plain_response;

/// Build the redirect target for a request arriving on the cleartext
/// listener. The host is taken from the Host header with any port
/// stripped; the HTTPS port from configuration is appended.
pub fn redirect_location(host_header: Option<&str>, https_port: &str, req_uri: &http::Uri) -> String {
    let raw_host = host_header.unwrap_or("localhost");
    let host = strip_port(raw_host);
    let path_and_query = req_uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("https://{host}:{https_port}{path_and_query}")
}

/// Remove a trailing `:port` from a Host header value, leaving IPv6
/// bracket notation intact.
fn strip_port(host: &str) -> &str {
    if let Some(stripped) = host.strip_prefix('[') {
        // IPv6 literal: [::1]:8000
        match stripped.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, _port)) => name,
            None => host,
        }
    }
}

/// Answer any request with a 301 to the HTTPS listener.
pub fn handle_redirect(https_port: &str, req: Request<Body>) -> Response<Body> {
    let host_header = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());
    let location = redirect_location(host_header, https_port, req.uri());

    tracing::debug!(%location, "redirecting cleartext request");

    match HeaderValue::from_str(&location) {
        Ok(value) => Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, value)
            .body(Body::empty())
            .unwrap_or_else(|_| plain_response(StatusCode::MOVED_PERMANENTLY, "")),
        Err(_) => plain_response(StatusCode::BAD_REQUEST, "Invalid Host header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_preserves_path_and_query() {
        let uri: http::Uri = "/users/1?verbose=true".parse().unwrap();
        let location = redirect_location(Some("gateway.example.com:8000"), "8443", &uri);
        assert_eq!(location, "https://gateway.example.com:8443/users/1?verbose=true");
    }

    #[test]
    fn test_redirect_host_without_port() {
        let uri: http::Uri = "/".parse().unwrap();
        let location = redirect_location(Some("gateway.example.com"), "8443", &uri);
        assert_eq!(location, "https://gateway.example.com:8443/");
    }

    #[test]
    fn test_redirect_ipv6_host() {
        let uri: http::Uri = "/users/1".parse().unwrap();
        let location = redirect_location(Some("[::1]:8000"), "8443", &uri);
        assert_eq!(location, "https://[::1]:8443/users/1");
    }

    #[test]
    fn test_handle_redirect_sets_location() {
        let req = Request::builder()
            .uri("/users/1?x=1")
            .header(header::HOST, "localhost:8000")
            .body(Body::empty())
            .unwrap();
        let response = handle_redirect("8443", req);
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://localhost:8443/users/1?x=1"
        );
    }
}
