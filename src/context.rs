//! Caller context resolution.
//!
//! Two invocation shapes, an HTTP-request-like object and an explicit
//! action context, are normalized here into one canonical
//! [`ResolvedContext`]. Everything downstream (identifier resolution, the
//! algorithm engine) is shape-agnostic.

use std::future::Future;
use std::net::IpAddr;

use crate::error::ConfigError;

/// Minimal view of an HTTP request: headers and the request URL.
///
/// Implement this for your framework's request type to rate limit it.
pub trait RequestLike {
    /// Get a header value by (lowercase) name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Get the request URL or path.
    fn url(&self) -> &str;
}

/// Resolves an authenticated user id from a request.
///
/// This is the boundary to the authentication subsystem; the limiter only
/// consumes the resulting id.
pub trait IdentityResolver<R>: Send + Sync + 'static {
    /// Return the authenticated user id, or `None` for anonymous callers.
    fn resolve_user(&self, request: &R) -> impl Future<Output = Option<String>> + Send;
}

/// Identity resolver that treats every caller as anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl<R: Sync> IdentityResolver<R> for NoIdentity {
    async fn resolve_user(&self, _request: &R) -> Option<String> {
        None
    }
}

/// Explicit context for non-HTTP call sites.
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    /// Authenticated user id, if known.
    pub user_id: Option<String>,
    /// Caller IP, if known.
    pub ip: Option<String>,
    /// Logical route being limited. Required; its absence is a
    /// configuration error and resolves as "not limited".
    pub path: Option<String>,
}

impl ActionContext {
    /// Create a context for the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            user_id: None,
            ip: None,
            path: Some(path.into()),
        }
    }

    /// Set the user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the caller IP.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub(crate) fn resolve(self) -> Result<ResolvedContext, ConfigError> {
        let path = match self.path {
            Some(p) if !p.is_empty() => p,
            _ => return Err(ConfigError::MissingPath),
        };
        Ok(ResolvedContext {
            user_id: self.user_id,
            ip: self.ip.and_then(|raw| raw.trim().parse().ok()),
            path,
        })
    }
}

/// Canonical internal context, shared by both invocation shapes.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Validated caller IP; `None` when no candidate parsed as an address.
    pub ip: Option<IpAddr>,
    /// Route identity. Non-empty whenever evaluation proceeds.
    pub path: String,
}

impl ResolvedContext {
    pub(crate) async fn from_request<R, I>(request: &R, identity: &I) -> Self
    where
        R: RequestLike,
        I: IdentityResolver<R>,
    {
        Self {
            user_id: identity.resolve_user(request).await,
            ip: client_ip(request),
            path: path_of(request.url()),
        }
    }
}

/// Forwarded-for headers in precedence order: platform header first, then
/// the generic forwarded-for chain, then the real-ip header.
const IP_HEADERS: [&str; 3] = ["cf-connecting-ip", "x-forwarded-for", "x-real-ip"];

/// Derive the caller IP by header precedence.
///
/// Each candidate must parse as an IPv4/IPv6 address before acceptance;
/// spoofable garbage falls through to the next header.
pub(crate) fn client_ip<R: RequestLike>(request: &R) -> Option<IpAddr> {
    for name in IP_HEADERS {
        let Some(value) = request.header(name) else {
            continue;
        };
        // X-Forwarded-For may carry a chain; the client is the first entry.
        let candidate = value.split(',').next().unwrap_or(value).trim();
        if let Ok(ip) = candidate.parse::<IpAddr>() {
            return Some(ip);
        }
    }
    None
}

/// Extract the path component from a URL or bare path.
pub(crate) fn path_of(url: &str) -> String {
    let after_host = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        None => url,
    };
    let end = after_host
        .find(['?', '#'])
        .unwrap_or(after_host.len());
    let path = &after_host[..end];
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockRequest {
        url: String,
        headers: HashMap<String, String>,
    }

    impl MockRequest {
        fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.insert(name.into(), value.into());
            self
        }
    }

    impl RequestLike for MockRequest {
        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(|s| s.as_str())
        }

        fn url(&self) -> &str {
            &self.url
        }
    }

    #[test]
    fn test_platform_header_wins() {
        let req = MockRequest::default()
            .with_header("cf-connecting-ip", "203.0.113.50")
            .with_header("x-forwarded-for", "198.51.100.7, 70.41.3.18");

        assert_eq!(client_ip(&req), Some("203.0.113.50".parse().unwrap()));
    }

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let req =
            MockRequest::default().with_header("x-forwarded-for", "198.51.100.7, 70.41.3.18");

        assert_eq!(client_ip(&req), Some("198.51.100.7".parse().unwrap()));
    }

    #[test]
    fn test_invalid_candidate_falls_through() {
        let req = MockRequest::default()
            .with_header("cf-connecting-ip", "not-an-ip")
            .with_header("x-real-ip", "2001:db8::1");

        assert_eq!(client_ip(&req), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_no_valid_candidate_is_unknown() {
        let req = MockRequest::default().with_header("x-forwarded-for", "localhost");
        assert_eq!(client_ip(&req), None);
    }

    #[test]
    fn test_path_of() {
        assert_eq!(path_of("https://example.com/api/survey?x=1"), "/api/survey");
        assert_eq!(path_of("/api/survey#frag"), "/api/survey");
        assert_eq!(path_of("https://example.com"), "/");
    }

    #[test]
    fn test_action_context_requires_path() {
        let err = ActionContext::default().resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingPath));

        let ctx = ActionContext::new("/api/waitlist")
            .with_user("user-9")
            .with_ip("10.1.2.3")
            .resolve()
            .unwrap();
        assert_eq!(ctx.path, "/api/waitlist");
        assert_eq!(ctx.user_id.as_deref(), Some("user-9"));
        assert_eq!(ctx.ip, Some("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_action_context_invalid_ip_is_unknown() {
        let ctx = ActionContext::new("/api/forms")
            .with_ip("garbage")
            .resolve()
            .unwrap();
        assert_eq!(ctx.ip, None);
    }
}
