//! Authenticating Reverse-Proxy Gateway
//!
//! Sits in front of a backend service and verifies JWT bearer tokens at the
//! edge, so the backend never has to parse or trust client-origin credentials.
//!
//! # Request pipeline
//!
//! - **CORS injection**: configured allow-origin/allow-headers on every response
//! - **Authorization middleware**: route policy (whitelist/blacklist) decides
//!   whether a valid token is required; HMAC-only JWT verification rejects
//!   algorithm-confusion tokens before any signature check
//! - **Forwarder**: rewrites the trust-boundary headers (`X-Forwarded-*`,
//!   `X-Auth-UserID`, `Authorization`) and hands the request to the upstream
//!   transport
//!
//! Token issuance (login, signup, refresh) belongs to a separate identity
//! service that shares the signing secret and claims schema with this gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
