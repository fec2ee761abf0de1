//! Single-host request forwarding.
//!
//! Sends an inbound request on to the backend and relays the backend's status,
//! headers and body back unchanged, streaming both directions. Hop-by-hop
//! headers are dropped on the way through, as any reverse proxy must.

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Uri};
use axum::response::Response;
use reqwest::Url;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Forwarding errors
#[derive(Debug, Error)]
pub enum ForwardError {
    /// HTTP client could not be constructed
    #[error("building the backend client: {0}")]
    Client(reqwest::Error),

    /// Backend unreachable or failed mid-request
    #[error("backend request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Forwards requests to one backend base URL.
pub struct Forwarder {
    client: reqwest::Client,
    backend: Url,
}

impl Forwarder {
    /// Create a forwarder for `backend`.
    ///
    /// Redirects are never followed: they are relayed to the client as-is.
    pub fn new(backend: Url, timeout: Option<Duration>) -> Result<Self, ForwardError> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(ForwardError::Client)?;

        Ok(Self { client, backend })
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    /// Backend URL for an inbound request URI.
    ///
    /// Scheme, host and port come from the backend. The request path is
    /// appended to the backend's base path with exactly one slash between them,
    /// and the two query strings are concatenated.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.backend.clone();
        url.set_path(&join_paths(self.backend.path(), uri.path()));

        let query = match (self.backend.query(), uri.query()) {
            (Some(base), Some(req)) if !base.is_empty() && !req.is_empty() => {
                Some(format!("{}&{}", base, req))
            }
            (Some(base), _) if !base.is_empty() => Some(base.to_string()),
            (_, Some(req)) if !req.is_empty() => Some(req.to_string()),
            _ => None,
        };
        url.set_query(query.as_deref());

        url
    }

    /// Send `req` to the backend and turn its answer into a response for the client.
    pub async fn forward(
        &self,
        req: Request,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response, ForwardError> {
        let (parts, body) = req.into_parts();
        let target = self.target_url(&parts.uri);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // reqwest derives Host from the target URL
        headers.remove(header::HOST);
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut headers, addr);
        }

        debug!(method = %parts.method, target = %target, "Forwarding request");

        let mut outbound = self
            .client
            .request(parts.method, target)
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outbound.send().await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }
}

/// Join two URL paths with a single slash.
pub fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append the client IP to `X-Forwarded-For`, keeping earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        addr.ip().to_string()
    } else {
        format!("{}, {}", prior.join(", "), addr.ip())
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(backend: &str) -> Forwarder {
        Forwarder::new(Url::parse(backend).unwrap(), None).unwrap()
    }

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("/", "/v1/items"), "/v1/items");
        assert_eq!(join_paths("/api", "/v1"), "/api/v1");
        assert_eq!(join_paths("/api/", "/v1"), "/api/v1");
        assert_eq!(join_paths("/api", "v1"), "/api/v1");
    }

    #[test]
    fn test_target_url_rewrites_scheme_and_host() {
        let f = forwarder("https://backend.internal:8443");
        let uri: Uri = "http://localhost:8080/v1/items?page=2".parse().unwrap();

        let target = f.target_url(&uri);
        assert_eq!(target.as_str(), "https://backend.internal:8443/v1/items?page=2");
    }

    #[test]
    fn test_target_url_keeps_base_path_and_query() {
        let f = forwarder("http://backend/base?tenant=a");

        let uri: Uri = "/items?page=2".parse().unwrap();
        assert_eq!(
            f.target_url(&uri).as_str(),
            "http://backend/base/items?tenant=a&page=2"
        );

        let uri: Uri = "/items".parse().unwrap();
        assert_eq!(f.target_url(&uri).as_str(), "http://backend/base/items?tenant=a");
    }

    #[test]
    fn test_target_url_without_query() {
        let f = forwarder("http://backend");
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(f.target_url(&uri).as_str(), "http://backend/");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key("content-type"));
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn test_append_forwarded_for() {
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();

        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, addr);
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.7");

        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.9"));
        append_forwarded_for(&mut headers, addr);
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "203.0.113.9, 10.0.0.7");
    }
}
