//! Reverse-proxy forwarding
//!
//! Rewrites an authorized request into one safe to send upstream, then hands
//! it to a [`ForwardingTransport`] for connection handling, body streaming
//! and response relay. The rewrite is the trust boundary: whatever identity
//! headers the client sent are gone by the time the backend sees the request,
//! and only gateway-asserted values remain.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::warn;
use url::Url;

use super::context::AuthIdentity;
use crate::{Error, Result};

/// Identity header asserted by the gateway. The backend trusts this value
/// unconditionally, so no client-supplied header of the same name may ever
/// survive the rewrite.
pub const AUTH_USER_HEADER: &str = "x-auth-userid";

/// Hop-by-hop headers (RFC 7230 §6.1) that must not be relayed.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name == h)
}

/// Transport capability for the prepared upstream hop.
///
/// Owns connection handling, request/response body streaming and relay.
/// Transport-level failures (refused connection, timeout) surface as whatever
/// error response the implementation produces; the forwarder never retries.
#[async_trait]
pub trait ForwardingTransport: Send + Sync {
    /// Send a prepared request upstream and relay the streamed response.
    async fn forward(&self, request: Request<Body>) -> Response;
}

/// Rewrite a request for the upstream hop. Order matters.
///
/// 1. Pick the forwarding scheme: the request's own scheme when the request
///    target is in absolute form, else the configured fallback. For
///    server-terminated requests the target is in origin form, so the
///    fallback branch is effectively what always runs; both are kept.
/// 2. Record the client-facing facts in `X-Forwarded-For`, `X-Forwarded-Host`,
///    `X-Forwarded-Proto` and the combined `Forwarded` header.
/// 3. Assert `X-Auth-UserID` from the verified identity, overwriting any
///    client-supplied value - empty string when anonymous.
/// 4. Drop the inbound `Authorization` header, then re-attach
///    `Bearer <token>` only when a verified raw token is in context. A
///    request that failed or skipped verification never carries a credential
///    upstream.
/// 5. Point the request at the configured target, preserving path and query
///    verbatim. The inbound `Host` header is dropped so the transport derives
///    it from the new destination.
pub fn prepare_upstream_request(
    request: Request<Body>,
    identity: &AuthIdentity,
    client_addr: Option<SocketAddr>,
    target: &Url,
    fallback_scheme: &str,
) -> Result<Request<Body>> {
    let (mut parts, body) = request.into_parts();

    let scheme = parts
        .uri
        .scheme_str()
        .unwrap_or(fallback_scheme)
        .to_string();

    let original_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_owned()))
        .unwrap_or_default();

    let client = client_addr.map(|a| a.to_string()).unwrap_or_default();

    set_header(&mut parts.headers, "x-forwarded-for", &client)?;
    set_header(&mut parts.headers, "x-forwarded-host", &original_host)?;
    set_header(&mut parts.headers, "x-forwarded-proto", &scheme)?;
    set_header(
        &mut parts.headers,
        "forwarded",
        &format!("for={client};host={original_host};proto={scheme}"),
    )?;

    set_header(&mut parts.headers, AUTH_USER_HEADER, identity.subject())?;

    parts.headers.remove(header::AUTHORIZATION);
    if !identity.raw_token().is_empty() {
        set_header(
            &mut parts.headers,
            "authorization",
            &format!("Bearer {}", identity.raw_token()),
        )?;
    }

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let authority = match target.port() {
        Some(port) => format!("{}:{port}", target.host_str().unwrap_or_default()),
        None => target.host_str().unwrap_or_default().to_string(),
    };
    parts.uri = format!("{}://{authority}{path_and_query}", target.scheme())
        .parse::<Uri>()
        .map_err(|e| Error::Internal(format!("Invalid upstream URI: {e}")))?;
    parts.headers.remove(header::HOST);

    Ok(Request::from_parts(parts, body))
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| Error::Internal(format!("Invalid value for header {name}: {e}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Reqwest-backed [`ForwardingTransport`].
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// Build the upstream HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend fails to initialize.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            // Redirects are relayed to the client, never followed here
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ForwardingTransport for HttpForwarder {
    async fn forward(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let url = parts.uri.to_string();

        let result = self
            .client
            .request(parts.method, &url)
            .headers(parts.headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        match result {
            Ok(upstream) => relay_response(upstream),
            Err(e) => {
                warn!(url = %url, error = %e, "Upstream request failed");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

/// Relay status, headers and the streamed body from an upstream response.
/// Bodies are never buffered whole; memory stays bounded under load.
fn relay_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
