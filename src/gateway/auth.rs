//! Bearer-token verification and the authorization middleware
//!
//! # Verification flow
//!
//! 1. Read the `Authorization` header; require the `Bearer ` prefix.
//! 2. Decode the (unverified) JOSE header and check the declared algorithm is
//!    in the HMAC family. This runs BEFORE any signature work: a token
//!    declaring `none` or an asymmetric algorithm must never reach a verifier
//!    keyed with the shared secret, or an attacker could have the secret
//!    treated as an RSA public key (algorithm confusion).
//! 3. Verify signature plus `exp`/`nbf` against the single shared secret.
//!
//! # Failure semantics
//!
//! On paths where a token is mandatory, every failure collapses to a bare
//! 401 - the cause goes to the server log only, so clients cannot probe
//! whether a token was expired, forged, or absent. On optional paths the
//! request simply continues anonymous.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::AuthIdentity;
use super::policy::{AuthDecision, RoutePolicy};

/// Error variants for bearer-token verification failures.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// No `Authorization` header, or an empty one.
    #[error("missing Authorization header")]
    MissingHeader,

    /// The header does not carry a `Bearer ` credential.
    #[error("malformed Authorization header")]
    MalformedHeader,

    /// The token declares a non-HMAC algorithm (`none`, RSA, EC, ...).
    #[error("unsupported signing method: {0}")]
    UnsupportedSigningMethod(String),

    /// Signature, expiry or not-before validation failed.
    #[error("token validation failed: {0}")]
    TokenInvalid(#[from] jsonwebtoken::errors::Error),
}

/// Token payload shared with the identity service that mints tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier, forwarded upstream as `X-Auth-UserID`
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    /// Issued-at (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Not-before (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

/// Minimal view of the JOSE header, decoded without verification.
#[derive(Debug, Deserialize)]
struct JoseHeader {
    alg: String,
}

/// Verifies bearer tokens against the single configured shared secret.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    /// Create a verifier for the given HMAC secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verify an `Authorization` header value.
    ///
    /// On success returns the parsed claims and the verbatim token string
    /// stripped of the `Bearer ` prefix, ready for re-forwarding.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError`] when the header is absent or malformed, the
    /// declared algorithm is not HMAC, the signature does not match, or the
    /// temporal claims (`exp`, `nbf`) are violated.
    pub fn verify(&self, header_value: Option<&str>) -> Result<(Claims, String), VerifyError> {
        let header_value = header_value.unwrap_or("");
        if header_value.is_empty() {
            return Err(VerifyError::MissingHeader);
        }
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or(VerifyError::MalformedHeader)?;

        // Algorithm-family check before any signature verification
        let algorithm = match declared_algorithm(token)?.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(VerifyError::UnsupportedSigningMethod(other.to_string()));
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_nbf = true;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok((data.claims, token.to_string()))
    }
}

/// Read the algorithm a token declares, without verifying anything.
///
/// Decoded by hand rather than via [`jsonwebtoken::decode_header`] so that
/// algorithms the library does not model (notably `none`) are still reported
/// by name instead of as a generic parse failure.
fn declared_algorithm(token: &str) -> Result<String, VerifyError> {
    let segment = token.split('.').next().unwrap_or("");
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, segment)
        .map_err(|_| invalid_token())?;
    let header: JoseHeader = serde_json::from_slice(&bytes).map_err(|_| invalid_token())?;
    Ok(header.alg)
}

fn invalid_token() -> VerifyError {
    VerifyError::TokenInvalid(jsonwebtoken::errors::Error::from(
        jsonwebtoken::errors::ErrorKind::InvalidToken,
    ))
}

/// Shared state for the authorization middleware.
pub struct AuthState {
    /// Route policy, resolved at startup
    pub policy: RoutePolicy,
    /// Token verifier keyed with the shared secret
    pub verifier: TokenVerifier,
}

/// Authorization middleware
///
/// Classifies each request as optional-auth (OPTIONS, or a path the policy
/// bypasses) or mandatory-auth, then attempts verification exactly once.
/// The outcome is one of: continue anonymous, continue authenticated, or a
/// bodiless 401. The identity record is inserted here and nowhere else.
pub async fn auth_middleware(
    State(state): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let optional = request.method() == Method::OPTIONS
        || state.policy.decide(&path) == AuthDecision::Bypass;

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match state.verifier.verify(header_value.as_deref()) {
        Ok((claims, raw_token)) => {
            debug!(user_id = %claims.user_id, path = %path, "Verified bearer token");
            request
                .extensions_mut()
                .insert(AuthIdentity::authenticated(claims.user_id, raw_token));
        }
        Err(e) if optional => {
            debug!(path = %path, error = %e, "Continuing unauthenticated");
            request.extensions_mut().insert(AuthIdentity::anonymous());
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Token verification failed");
            // Cause stays in the log; the client gets a bare 401.
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    next.run(request).await
}
