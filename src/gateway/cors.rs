//! CORS header injection
//!
//! Reflects the two configured header values onto every outgoing response
//! (error responses included) and answers bare preflight requests with an
//! empty 204, independent of the authorization pipeline.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};

use crate::config::CorsConfig;
use crate::{Error, Result};

/// Pre-parsed CORS header values, validated once at startup.
#[derive(Debug, Clone)]
pub struct CorsSettings {
    allow_origin: HeaderValue,
    allow_headers: HeaderValue,
}

impl CorsSettings {
    /// Parse the configured strings into header values.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if either value is not a legal header value.
    pub fn from_config(config: &CorsConfig) -> Result<Self> {
        let allow_origin = HeaderValue::from_str(&config.allow_origin)
            .map_err(|e| Error::Config(format!("Invalid cors.allow_origin: {e}")))?;
        let allow_headers = HeaderValue::from_str(&config.allow_headers)
            .map_err(|e| Error::Config(format!("Invalid cors.allow_headers: {e}")))?;
        Ok(Self {
            allow_origin,
            allow_headers,
        })
    }
}

/// Middleware setting the CORS headers on every response.
pub async fn cors_middleware(
    State(settings): State<Arc<CorsSettings>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        settings.allow_origin.clone(),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        settings.allow_headers.clone(),
    );
    response
}

/// Handler for bare preflight requests. The CORS headers themselves come
/// from [`cors_middleware`], which wraps every route.
pub async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}
