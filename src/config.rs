//! Configuration management
//!
//! Loaded once at startup from an optional YAML file plus `AUTH_GATEWAY_`
//! environment overrides, then shared read-only for the life of the process.

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Proxy configuration
    pub proxy: ProxyConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing secret shared with the identity service that mints tokens.
    /// Supports: literal value or `env:VAR_NAME`
    pub jwt_signing_key: String,

    /// Path prefix reserved for the identity service's public API.
    /// Requests under this prefix require a valid token unless they hit one of
    /// the token-issuance routes (login, signup, confirm, initpwreset).
    pub public_api_path: String,

    /// Whitelist patterns. When non-empty the gateway runs in whitelist mode:
    /// only matching paths bypass token verification.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Blacklist patterns. Consulted only when the whitelist is empty:
    /// matching paths require a token, everything else bypasses.
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_signing_key: String::new(),
            public_api_path: "/auth/".to_string(),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve the signing key (expand `env:VAR_NAME` references)
    #[must_use]
    pub fn resolve_signing_key(&self) -> String {
        if let Some(var_name) = self.jwt_signing_key.strip_prefix("env:") {
            env::var(var_name).unwrap_or_else(|_| self.jwt_signing_key.clone())
        } else {
            self.jwt_signing_key.clone()
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Upstream target, `scheme://host[:port]`. Path and query of inbound
    /// requests are preserved when rewriting to this target.
    pub target: String,
    /// Scheme assumed when an inbound request-target carries none.
    /// Server-terminated requests always carry one; this is a defensive default.
    pub fallback_scheme: String,
    /// Connect timeout for the upstream client
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target: "http://127.0.0.1:8090".to_string(),
            fallback_scheme: "http".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ProxyConfig {
    /// Parse the configured target into a URL.
    pub fn target_url(&self) -> Result<Url> {
        let url = Url::parse(&self.target)
            .map_err(|e| Error::Config(format!("Invalid proxy target '{}': {e}", self.target)))?;
        if url.host_str().is_none() {
            return Err(Error::Config(format!(
                "Proxy target '{}' has no host",
                self.target
            )));
        }
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::Config(format!(
                "Proxy target scheme must be http or https, got '{other}'"
            ))),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS header injection and the preflight responder.
    /// When disabled, OPTIONS requests are proxied upstream like any other.
    pub enabled: bool,
    /// Value for `Access-Control-Allow-Origin`
    pub allow_origin: String,
    /// Value for `Access-Control-Allow-Headers`
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origin: "*".to_string(),
            allow_headers: "Authorization,Content-Type".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (AUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("AUTH_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();

        config.normalize();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// The public API prefix must be slash-delimited on both sides so the
    /// derived token-issuance routes concatenate cleanly.
    fn normalize(&mut self) {
        let p = &mut self.auth.public_api_path;
        if !p.starts_with('/') {
            p.insert(0, '/');
        }
        if !p.ends_with('/') {
            p.push('/');
        }
    }

    /// Validate cross-field constraints that serde defaults cannot express.
    fn validate(&self) -> Result<()> {
        if self.auth.resolve_signing_key().is_empty() {
            return Err(Error::Config(
                "auth.jwt_signing_key must be set (literal or env:VAR_NAME)".to_string(),
            ));
        }
        self.proxy.target_url()?;
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
