//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::{AuthState, TokenVerifier};
use super::cors::CorsSettings;
use super::forward::HttpForwarder;
use super::policy::RoutePolicy;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::{Error, Result};

/// Authenticating reverse-proxy server
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway from loaded configuration.
    ///
    /// All shared state (policy, verifier, transport) is resolved here, once,
    /// and is read-only while serving.
    pub fn new(config: Config) -> Result<Self> {
        let policy = RoutePolicy::from_config(&config.auth);
        let verifier = TokenVerifier::new(&config.auth.resolve_signing_key());
        let auth = Arc::new(AuthState { policy, verifier });

        let cors = if config.cors.enabled {
            Some(Arc::new(CorsSettings::from_config(&config.cors)?))
        } else {
            None
        };

        let transport = Arc::new(HttpForwarder::new(config.proxy.connect_timeout)?);
        let target = config.proxy.target_url()?;

        let state = Arc::new(AppState {
            auth,
            cors,
            transport,
            target,
            fallback_scheme: config.proxy.fallback_scheme.clone(),
        });

        Ok(Self { config, state })
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(target = %self.config.proxy.target, "Proxying to");

        if self.config.auth.whitelist.is_empty() {
            if self.config.auth.blacklist.is_empty() {
                warn!("No whitelist or blacklist configured - every path outside the public API bypasses token verification");
            } else {
                info!(
                    patterns = self.config.auth.blacklist.len(),
                    "Blacklist mode: listed paths require a token, everything else bypasses"
                );
            }
        } else {
            info!(
                patterns = self.config.auth.whitelist.len(),
                "Whitelist mode: listed paths bypass, everything else requires a token"
            );
        }

        if self.config.cors.enabled {
            info!(origin = %self.config.cors.allow_origin, "CORS enabled");
        }
        info!("============================================================");

        // Client addresses feed X-Forwarded-For, so serve with connect info
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
