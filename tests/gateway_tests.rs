//! End-to-end pipeline tests
//!
//! Drive the full router (CORS -> authorization -> forwarding) with a
//! capturing mock transport, asserting both what the client gets back and
//! what the upstream backend would actually have seen.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use pretty_assertions::assert_eq;
use tower::ServiceExt;
use url::Url;

use auth_gateway::config::{AuthConfig, CorsConfig};
use auth_gateway::gateway::auth::{AuthState, Claims, TokenVerifier};
use auth_gateway::gateway::cors::CorsSettings;
use auth_gateway::gateway::forward::ForwardingTransport;
use auth_gateway::gateway::policy::RoutePolicy;
use auth_gateway::gateway::{AppState, create_router};

const SECRET: &str = "integration-test-secret";
const CLIENT_ADDR: &str = "203.0.113.7:41812";

/// What the mock transport observed about the prepared upstream request.
#[derive(Debug, Clone)]
struct CapturedRequest {
    method: Method,
    uri: String,
    headers: HeaderMap,
}

/// Transport double - records the prepared request, returns a canned response.
struct MockTransport {
    status: StatusCode,
    body: &'static str,
    captured: Mutex<Option<CapturedRequest>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::responding(StatusCode::OK, "upstream-ok")
    }

    fn responding(status: StatusCode, body: &'static str) -> Self {
        Self {
            status,
            body,
            captured: Mutex::new(None),
        }
    }

    fn captured(&self) -> Option<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForwardingTransport for MockTransport {
    async fn forward(&self, request: Request<Body>) -> Response {
        *self.captured.lock().unwrap() = Some(CapturedRequest {
            method: request.method().clone(),
            uri: request.uri().to_string(),
            headers: request.headers().clone(),
        });
        (self.status, [("x-upstream", "yes")], self.body).into_response()
    }
}

struct TestGateway {
    router: Router,
    transport: Arc<MockTransport>,
}

fn gateway(whitelist: &[&str], blacklist: &[&str], cors: bool) -> TestGateway {
    gateway_with_transport(whitelist, blacklist, cors, MockTransport::new())
}

fn gateway_with_transport(
    whitelist: &[&str],
    blacklist: &[&str],
    cors: bool,
    transport: MockTransport,
) -> TestGateway {
    let auth_config = AuthConfig {
        jwt_signing_key: SECRET.to_string(),
        public_api_path: "/auth/".to_string(),
        whitelist: whitelist.iter().map(ToString::to_string).collect(),
        blacklist: blacklist.iter().map(ToString::to_string).collect(),
    };

    let cors_settings = cors.then(|| {
        Arc::new(
            CorsSettings::from_config(&CorsConfig {
                enabled: true,
                allow_origin: "https://app.example.com".to_string(),
                allow_headers: "Authorization,Content-Type".to_string(),
            })
            .unwrap(),
        )
    });

    let transport = Arc::new(transport);
    let state = Arc::new(AppState {
        auth: Arc::new(AuthState {
            policy: RoutePolicy::from_config(&auth_config),
            verifier: TokenVerifier::new(SECRET),
        }),
        cors: cors_settings,
        transport: Arc::clone(&transport) as Arc<dyn ForwardingTransport>,
        target: Url::parse("http://backend:9000").unwrap(),
        fallback_scheme: "http".to_string(),
    });

    TestGateway {
        router: create_router(state),
        transport,
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn mint(user_id: &str, exp_offset: i64) -> String {
    let now = now();
    let claims = Claims {
        user_id: user_id.to_string(),
        exp: now.saturating_add_signed(exp_offset),
        iat: Some(now),
        nbf: Some(now),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// A token whose header declares `alg: none`, otherwise shaped like a JWT.
fn alg_none_token() -> String {
    use base64::Engine;
    let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = b64.encode(b"{\"alg\":\"none\",\"typ\":\"JWT\"}");
    let payload = b64.encode(format!("{{\"userID\":\"mallory\",\"exp\":{}}}", now() + 3600));
    format!("{header}.{payload}.")
}

fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "gateway.example.com");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let addr: SocketAddr = CLIENT_ADDR.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .map(|v| v.to_str().unwrap())
        .unwrap_or_default()
}

#[tokio::test]
async fn token_issuance_routes_reach_upstream_without_a_token() {
    for (whitelist, blacklist) in [
        (&[][..], &[][..]),
        (&["/public"][..], &[][..]),
        (&[][..], &["/auth"][..]),
    ] {
        let gw = gateway(whitelist, blacklist, false);
        for path in ["/auth/login", "/auth/signup", "/auth/confirm", "/auth/initpwreset"] {
            let response = gw
                .router
                .clone()
                .oneshot(request(Method::POST, path, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "path {path}");
        }
    }
}

#[tokio::test]
async fn public_api_path_requires_token_even_when_whitelisted() {
    let gw = gateway(&["/auth/changepw"], &[], false);
    let response = gw
        .router
        .oneshot(request(Method::POST, "/auth/changepw", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // The transport must never have been consulted
    assert!(gw.transport.captured().is_none());
}

#[tokio::test]
async fn whitelist_mode_bypasses_listed_paths_only() {
    let gw = gateway(&["/public"], &[], false);

    let response = gw
        .router
        .clone()
        .oneshot(request(Method::GET, "/public/x", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/private", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn whitelist_boundary_does_not_leak_to_sibling_paths() {
    let gw = gateway(&["/foo"], &[], false);

    for (path, expected) in [
        ("/foo", StatusCode::OK),
        ("/foo/bar", StatusCode::OK),
        ("/foobar", StatusCode::UNAUTHORIZED),
    ] {
        let response = gw
            .router
            .clone()
            .oneshot(request(Method::GET, path, None))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "path {path}");
    }
}

#[tokio::test]
async fn blacklist_mode_is_fail_open_for_unmatched_paths() {
    let gw = gateway(&[], &["/health"], false);

    // Matched path requires a token
    let response = gw
        .router
        .clone()
        .oneshot(request(Method::GET, "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Everything unmatched bypasses verification - deliberate fail-open
    let response = gw
        .router
        .oneshot(request(Method::GET, "/anything-else", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn valid_token_forwards_identity_and_credential() {
    let gw = gateway(&["/public"], &[], false);
    let token = mint("u1", 3600);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/private/data?limit=5", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let captured = gw.transport.captured().expect("request reached upstream");
    assert_eq!(captured.uri, "http://backend:9000/private/data?limit=5");
    assert_eq!(header_str(&captured.headers, "x-auth-userid"), "u1");
    assert_eq!(
        header_str(&captured.headers, "authorization"),
        format!("Bearer {token}")
    );
}

#[tokio::test]
async fn forwarded_headers_describe_the_original_request() {
    let gw = gateway(&[], &[], false);

    gw.router
        .oneshot(request(Method::GET, "/api/items", None))
        .await
        .unwrap();

    let captured = gw.transport.captured().unwrap();
    assert_eq!(
        header_str(&captured.headers, "x-forwarded-for"),
        CLIENT_ADDR
    );
    assert_eq!(
        header_str(&captured.headers, "x-forwarded-host"),
        "gateway.example.com"
    );
    assert_eq!(header_str(&captured.headers, "x-forwarded-proto"), "http");
    assert_eq!(
        header_str(&captured.headers, "forwarded"),
        format!("for={CLIENT_ADDR};host=gateway.example.com;proto=http")
    );
    // Host is left for the transport to derive from the rewritten target
    assert_eq!(header_str(&captured.headers, "host"), "");
}

#[tokio::test]
async fn expired_token_rejected_on_mandatory_path() {
    let gw = gateway(&["/public"], &[], false);
    let token = mint("u1", -3600);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/private", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(gw.transport.captured().is_none());
}

#[tokio::test]
async fn expired_token_continues_anonymous_on_optional_path() {
    let gw = gateway(&["/public"], &[], false);
    let token = mint("u1", -3600);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/public/page", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let captured = gw.transport.captured().unwrap();
    // Indistinguishable upstream from a request that never presented a token
    assert_eq!(header_str(&captured.headers, "x-auth-userid"), "");
    assert!(captured.headers.get("authorization").is_none());
}

#[tokio::test]
async fn alg_none_token_rejected_on_mandatory_and_anonymous_on_optional() {
    let gw = gateway(&["/public"], &[], false);
    let token = alg_none_token();

    let response = gw
        .router
        .clone()
        .oneshot(request(Method::GET, "/private", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/public/page", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let captured = gw.transport.captured().unwrap();
    assert_eq!(header_str(&captured.headers, "x-auth-userid"), "");
    assert!(captured.headers.get("authorization").is_none());
}

#[tokio::test]
async fn spoofed_identity_header_is_overwritten() {
    let gw = gateway(&[], &[], false);

    let mut req = request(Method::GET, "/api/items", None);
    req.headers_mut()
        .insert("x-auth-userid", "forged-admin".parse().unwrap());
    gw.router.oneshot(req).await.unwrap();

    let captured = gw.transport.captured().unwrap();
    let values: Vec<_> = captured.headers.get_all("x-auth-userid").iter().collect();
    assert_eq!(values, vec![""]);
}

#[tokio::test]
async fn mandatory_rejections_are_indistinguishable() {
    let gw = gateway(&["/public"], &[], true);
    let expired = mint("u1", -3600);

    let cases: Vec<Option<String>> = vec![
        None,
        Some("not-a-bearer".to_string()),
        Some(expired),
    ];

    for token in cases {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri("/private")
            .header(header::HOST, "gateway.example.com");
        if let Some(ref token) = token {
            // Raw header value, deliberately not Bearer-prefixed for case 2
            let value = if token.contains('.') {
                format!("Bearer {token}")
            } else {
                token.clone()
            };
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = CLIENT_ADDR.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));

        let response = gw.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        // CORS headers still present on error responses
        assert_eq!(
            header_str(response.headers(), "access-control-allow-origin"),
            "https://app.example.com"
        );
        // Empty body: no oracle for the failure cause
        assert!(body_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn options_never_rejected_and_carries_cors_headers() {
    let gw = gateway(&["/public"], &[], true);

    // Mandatory-auth path, no token - OPTIONS still passes
    let response = gw
        .router
        .oneshot(request(Method::OPTIONS, "/private", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        header_str(response.headers(), "access-control-allow-origin"),
        "https://app.example.com"
    );
    assert_eq!(
        header_str(response.headers(), "access-control-allow-headers"),
        "Authorization,Content-Type"
    );
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn cors_headers_injected_on_proxied_responses() {
    let gw = gateway(&[], &[], true);

    let response = gw
        .router
        .oneshot(request(Method::GET, "/api/items", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(response.headers(), "access-control-allow-origin"),
        "https://app.example.com"
    );
}

#[tokio::test]
async fn cors_disabled_proxies_options_upstream() {
    let gw = gateway(&[], &[], false);

    let response = gw
        .router
        .oneshot(request(Method::OPTIONS, "/api/items", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let captured = gw.transport.captured().expect("OPTIONS reached upstream");
    assert_eq!(captured.method, Method::OPTIONS);
    assert!(response.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn upstream_response_is_relayed_unchanged() {
    let gw = gateway_with_transport(
        &[],
        &[],
        false,
        MockTransport::responding(StatusCode::NOT_FOUND, "no such thing"),
    );

    let response = gw
        .router
        .oneshot(request(Method::GET, "/missing", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header_str(response.headers(), "x-upstream"), "yes");
    assert_eq!(body_bytes(response).await, b"no such thing");
}
