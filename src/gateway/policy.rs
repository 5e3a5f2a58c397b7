//! Route-based authorization policy
//!
//! Pure decision logic mapping a request path to "token required" or
//! "token optional". Resolved once at startup from configuration; every
//! request consults the same read-only policy.

use crate::config::AuthConfig;

/// Routes under the public API prefix that must stay reachable without a
/// token: they are exactly the operations a client performs before it can
/// possibly hold one.
const TOKEN_ISSUANCE_ROUTES: [&str; 4] = ["login", "signup", "confirm", "initpwreset"];

/// Outcome of a policy decision for a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// Token verification is optional; a failed or absent token never rejects.
    Bypass,
    /// A valid token is required; verification failure rejects the request.
    RequireAuth,
}

/// Resolved route policy.
///
/// Whitelist and blacklist are mutually exclusive modes: a non-empty
/// whitelist switches the gateway to default-deny-bypass and the blacklist is
/// never consulted.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    /// Always-bypass routes derived from the public API prefix
    unauthorized_routes: Vec<String>,
    /// Public API prefix (require-auth zone, except the routes above)
    public_api_path: String,
    /// Whitelist patterns (whitelist mode when non-empty)
    whitelist: Vec<String>,
    /// Blacklist patterns (blacklist mode)
    blacklist: Vec<String>,
}

impl RoutePolicy {
    /// Build the policy from configuration, deriving the unauthorized-routes
    /// set from the public API prefix.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let unauthorized_routes = TOKEN_ISSUANCE_ROUTES
            .iter()
            .map(|route| format!("{}{route}", config.public_api_path))
            .collect();

        Self {
            unauthorized_routes,
            public_api_path: config.public_api_path.clone(),
            whitelist: config.whitelist.clone(),
            blacklist: config.blacklist.clone(),
        }
    }

    /// Decide whether `path` requires a verified token.
    ///
    /// Order matters, first match wins:
    /// 1. token-issuance routes always bypass;
    /// 2. everything else under the public API prefix requires auth, even if
    ///    a whitelist entry would also match it;
    /// 3. whitelist mode: bypass only on a whitelist match;
    /// 4. blacklist mode: require auth only on a blacklist match, everything
    ///    unmatched bypasses.
    #[must_use]
    pub fn decide(&self, path: &str) -> AuthDecision {
        if self
            .unauthorized_routes
            .iter()
            .any(|pattern| pattern_matches(path, pattern))
        {
            return AuthDecision::Bypass;
        }

        if path.starts_with(&self.public_api_path) {
            return AuthDecision::RequireAuth;
        }

        if !self.whitelist.is_empty() {
            if self
                .whitelist
                .iter()
                .any(|pattern| pattern_matches(path, pattern))
            {
                return AuthDecision::Bypass;
            }
            return AuthDecision::RequireAuth;
        }

        if self
            .blacklist
            .iter()
            .any(|pattern| pattern_matches(path, pattern))
        {
            return AuthDecision::RequireAuth;
        }
        AuthDecision::Bypass
    }
}

/// Prefix match with a path-segment boundary: `/foo` matches `/foo` and
/// `/foo/bar` but not `/foobar`. Patterns are trimmed of surrounding
/// whitespace and a trailing slash; an empty pattern never matches.
fn pattern_matches(path: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_end_matches('/');
    if pattern.is_empty() {
        return false;
    }
    path == pattern || path.starts_with(&format!("{pattern}/"))
}
