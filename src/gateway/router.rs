//! HTTP router and the forward handler

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, options},
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};
use url::Url;

use super::auth::{AuthState, auth_middleware};
use super::context::AuthIdentity;
use super::cors::{CorsSettings, cors_middleware, preflight_handler};
use super::forward::{ForwardingTransport, prepare_upstream_request};

/// Shared application state
pub struct AppState {
    /// Authorization state (route policy + token verifier)
    pub auth: Arc<AuthState>,
    /// CORS settings; `None` when CORS is disabled
    pub cors: Option<Arc<CorsSettings>>,
    /// Upstream transport
    pub transport: Arc<dyn ForwardingTransport>,
    /// Upstream target (scheme + host)
    pub target: Url,
    /// Scheme assumed when the inbound request-target carries none
    pub fallback_scheme: String,
}

/// Create the router
///
/// Every path routes to the forward handler; with CORS enabled, OPTIONS
/// requests are answered by the dedicated preflight responder instead of
/// being proxied. Registration is a plain function over the router value.
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);
    let cors = state.cors.clone();

    let method_router = if cors.is_some() {
        options(preflight_handler).fallback(forward_handler)
    } else {
        any(forward_handler)
    };

    let router = Router::new()
        .route("/", method_router.clone())
        .route("/{*path}", method_router)
        // Authorization middleware (innermost, so CORS headers reach 401s too)
        .layer(middleware::from_fn_with_state(auth, auth_middleware));

    let router = if let Some(cors) = cors {
        router.layer(middleware::from_fn_with_state(cors, cors_middleware))
    } else {
        router
    };

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Forward handler - rewrites the request and hands it to the transport.
async fn forward_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response {
    // Identity was inserted by the auth middleware; a request can only get
    // here after passing it, so absence means anonymous.
    let identity = request
        .extensions()
        .get::<AuthIdentity>()
        .cloned()
        .unwrap_or_default();

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);

    let prepared = match prepare_upstream_request(
        request,
        &identity,
        client_addr,
        &state.target,
        &state.fallback_scheme,
    ) {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(error = %e, "Failed to prepare upstream request");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(url = %prepared.uri(), "Proxying request");
    state.transport.forward(prepared).await
}
