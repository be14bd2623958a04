//! Identifier and policy resolution.
//!
//! Picks which quota applies to a call and the key it is tracked against.
//! A user id always wins; anonymous callers fall back to a salted one-way
//! hash of their IP when the fallback sub-policy allows it. Raw IP
//! addresses never appear in identifiers or store keys.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ResolvedContext;
use crate::error::ConfigError;
use crate::options::{Algorithm, ENV_DEFAULT_LIMIT, ENV_DEFAULT_WINDOW_SECS, RateLimitOptions};

/// What a quota is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// Authenticated user id.
    User,
    /// Salted SHA-256 of the caller IP.
    HashedIp,
}

impl IdKind {
    /// Kind label used in store keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::HashedIp => "ip",
        }
    }
}

/// The key a quota is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Scope of the identifier.
    pub kind: IdKind,
    /// User id, or hex-encoded salted IP hash. Never a raw IP.
    pub value: String,
}

/// Limit parameters resolved once per call.
///
/// The same policy builds both the store key and the local-cache key, so a
/// later options change never silently reuses a stale cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedPolicy {
    /// Requests allowed per window.
    pub limit: u64,
    /// Window length.
    pub window: Duration,
    /// Counting algorithm.
    pub algorithm: Algorithm,
}

/// Salted one-way hash of an IP address, hex-encoded.
///
/// Deterministic: the same IP and salt always produce the same identifier,
/// so quotas track correctly across instances without storing the address.
pub(crate) fn hash_ip(ip: &std::net::IpAddr, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.to_string().as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn primary_policy(options: &RateLimitOptions) -> Result<(u64, Duration), ConfigError> {
    let limit = options
        .limit
        .or_else(|| env_u64(ENV_DEFAULT_LIMIT))
        .ok_or_else(|| {
            ConfigError::MissingLimit(format!(
                "set RateLimitOptions::limit or {ENV_DEFAULT_LIMIT}"
            ))
        })?;
    let window = options
        .window
        .or_else(|| env_u64(ENV_DEFAULT_WINDOW_SECS).map(Duration::from_secs))
        .ok_or_else(|| {
            ConfigError::MissingLimit(format!(
                "set RateLimitOptions::window or {ENV_DEFAULT_WINDOW_SECS}"
            ))
        })?;
    if limit == 0 {
        return Err(ConfigError::MissingLimit("limit must be greater than 0".into()));
    }
    if window.is_zero() {
        return Err(ConfigError::InvalidWindow("window must be non-zero".into()));
    }
    Ok((limit, window))
}

/// Resolve the identifier and applied policy for a call.
///
/// Returns `Ok(None)` when no usable identity exists: anonymous callers
/// are never pooled into one shared bucket.
pub(crate) fn resolve(
    ctx: &ResolvedContext,
    options: &RateLimitOptions,
    ip_salt: &str,
) -> Result<Option<(Identifier, AppliedPolicy)>, ConfigError> {
    let (limit, window) = primary_policy(options)?;

    if let Some(user_id) = &ctx.user_id {
        let identifier = Identifier {
            kind: IdKind::User,
            value: user_id.clone(),
        };
        let policy = AppliedPolicy {
            limit,
            window,
            algorithm: options.algorithm.clone(),
        };
        return Ok(Some((identifier, policy)));
    }

    if options.ip_fallback.enabled {
        if let Some(ip) = &ctx.ip {
            let identifier = Identifier {
                kind: IdKind::HashedIp,
                value: hash_ip(ip, ip_salt),
            };
            let policy = AppliedPolicy {
                // Anonymous callers get half the authenticated budget unless
                // the fallback sub-policy says otherwise.
                limit: options.ip_fallback.limit.unwrap_or((limit / 2).max(1)),
                window: options.ip_fallback.window.unwrap_or(window),
                algorithm: options.algorithm.clone(),
            };
            return Ok(Some((identifier, policy)));
        }
    }

    Ok(None)
}

/// Compose the shared-store key for an identifier on a route.
pub(crate) fn store_key(prefix: &str, path: &str, identifier: &Identifier) -> String {
    format!(
        "{}:{}:{}:{}",
        prefix,
        path,
        identifier.kind.as_str(),
        identifier.value
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(user: Option<&str>, ip: Option<&str>) -> ResolvedContext {
        ResolvedContext {
            user_id: user.map(String::from),
            ip: ip.map(|s| s.parse().unwrap()),
            path: "/api/survey".into(),
        }
    }

    #[test]
    fn test_hash_is_deterministic_and_salted() {
        let ip = "203.0.113.50".parse().unwrap();
        assert_eq!(hash_ip(&ip, "salt"), hash_ip(&ip, "salt"));
        assert_ne!(hash_ip(&ip, "salt"), hash_ip(&ip, "pepper"));
        assert!(!hash_ip(&ip, "salt").contains("203"));
    }

    #[test]
    fn test_user_takes_precedence_over_ip() {
        let opts = RateLimitOptions::new(10, Duration::from_secs(60))
            .with_ip_fallback(crate::options::IpFallback::enabled());
        let (id, policy) = resolve(&ctx(Some("u-1"), Some("10.0.0.1")), &opts, "s")
            .unwrap()
            .unwrap();

        assert_eq!(id.kind, IdKind::User);
        assert_eq!(id.value, "u-1");
        assert_eq!(policy.limit, 10);
    }

    #[test]
    fn test_fallback_defaults_to_half_primary() {
        let opts = RateLimitOptions::new(10, Duration::from_secs(60))
            .with_ip_fallback(crate::options::IpFallback::enabled());
        let (id, policy) = resolve(&ctx(None, Some("10.0.0.1")), &opts, "s")
            .unwrap()
            .unwrap();

        assert_eq!(id.kind, IdKind::HashedIp);
        assert_eq!(policy.limit, 5);
        assert_eq!(policy.window, Duration::from_secs(60));
    }

    #[test]
    fn test_fallback_half_never_rounds_to_zero() {
        let opts = RateLimitOptions::new(1, Duration::from_secs(60))
            .with_ip_fallback(crate::options::IpFallback::enabled());
        let (_, policy) = resolve(&ctx(None, Some("10.0.0.1")), &opts, "s")
            .unwrap()
            .unwrap();
        assert_eq!(policy.limit, 1);
    }

    #[test]
    fn test_fallback_overrides() {
        let fallback = crate::options::IpFallback::enabled()
            .with_limit(2)
            .with_window(Duration::from_secs(30));
        let opts = RateLimitOptions::new(10, Duration::from_secs(60)).with_ip_fallback(fallback);
        let (_, policy) = resolve(&ctx(None, Some("10.0.0.1")), &opts, "s")
            .unwrap()
            .unwrap();

        assert_eq!(policy.limit, 2);
        assert_eq!(policy.window, Duration::from_secs(30));
    }

    #[test]
    fn test_no_identity_resolves_to_none() {
        // Fallback disabled
        let opts = RateLimitOptions::new(10, Duration::from_secs(60));
        assert!(resolve(&ctx(None, Some("10.0.0.1")), &opts, "s").unwrap().is_none());

        // Fallback enabled but no usable IP
        let opts = opts.with_ip_fallback(crate::options::IpFallback::enabled());
        assert!(resolve(&ctx(None, None), &opts, "s").unwrap().is_none());
    }

    #[test]
    fn test_missing_limit_is_config_error() {
        let opts = RateLimitOptions {
            key_prefix: "rl".into(),
            ..Default::default()
        };
        let err = resolve(&ctx(Some("u-1"), None), &opts, "s").unwrap_err();
        assert!(matches!(err, ConfigError::MissingLimit(_)));
    }

    #[test]
    fn test_store_key_layout() {
        let id = Identifier {
            kind: IdKind::User,
            value: "u-1".into(),
        };
        assert_eq!(store_key("rl", "/api/survey", &id), "rl:/api/survey:user:u-1");
    }
}
