//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Authenticating reverse proxy - JWT verification at the edge
#[derive(Parser, Debug)]
#[command(name = "auth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Upstream target to proxy to (scheme://host[:port])
    #[arg(long, env = "AUTH_GATEWAY_PROXY_TARGET")]
    pub proxy_target: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AUTH_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_GATEWAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
