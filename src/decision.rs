//! Decision and outcome types.
//!
//! Every evaluation resolves to an [`Outcome`]. A degraded limiter (store
//! outage, configuration gap, no usable identity) yields
//! `Outcome::Unevaluated`, which callers must treat as allowed. This keeps
//! "under limit" distinguishable from "limiter could not decide".

use serde::{Deserialize, Serialize};

use crate::headers::RateLimitHeaders;

/// The result of consulting a counting algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the identifier is over its quota.
    pub limited: bool,
    /// The limit in force for this call.
    pub limit: u64,
    /// Remaining requests before the limit is hit.
    pub remaining: u64,
    /// Unix-second timestamp at which the window/bucket state fully clears.
    /// Always >= the time of evaluation.
    pub reset: u64,
}

impl Decision {
    /// Create a decision, clamping `reset` so it never lies in the past.
    pub fn new(limited: bool, limit: u64, remaining: u64, reset: u64, now_secs: u64) -> Self {
        Self {
            limited,
            limit,
            remaining,
            reset: reset.max(now_secs),
        }
    }

    /// Seconds until the state clears, floored at zero.
    pub fn retry_after_secs(&self, now_secs: u64) -> u64 {
        self.reset.saturating_sub(now_secs)
    }
}

/// Why an evaluation resolved without a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The caller-supplied bypass predicate returned true.
    Bypassed,
    /// Action-style call without a path.
    MissingPath,
    /// No user id, and no usable IP (or IP fallback disabled).
    NoIdentity,
    /// No limit/window could be resolved from options or environment.
    InvalidConfig,
    /// The shared store could not be reached or failed mid-operation.
    StoreUnavailable,
}

/// Outcome of one rate-limit evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Under quota; the decision carries the remaining budget.
    Allowed(Decision),
    /// Over quota.
    Limited(Decision),
    /// Evaluation could not be completed; callers must treat this as allowed.
    Unevaluated(SkipReason),
}

impl Outcome {
    /// True unless the caller is over quota.
    pub fn permits(&self) -> bool {
        !matches!(self, Self::Limited(_))
    }

    /// True when the caller is over quota.
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited(_))
    }

    /// The underlying decision, if one was reached.
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::Allowed(d) | Self::Limited(d) => Some(d),
            Self::Unevaluated(_) => None,
        }
    }
}

/// A rejection rendered for HTTP-style callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Always 429.
    pub status: u16,
    /// Response headers; empty unless header inclusion is enabled.
    pub headers: Vec<(&'static str, String)>,
    /// The decision behind the rejection.
    pub decision: Decision,
}

/// Outcome of one evaluation for HTTP-style callers.
///
/// `Pass` is the pass-through sentinel: the caller's normal flow proceeds
/// and no response object is built. `Unevaluated` outcomes render as `Pass`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpOutcome {
    /// Continue normal request handling.
    Pass,
    /// Respond with 429 and the attached headers.
    Reject(Rejection),
}

impl HttpOutcome {
    /// Render an [`Outcome`] for an HTTP caller.
    pub(crate) fn render(outcome: Outcome, include_headers: bool, now_secs: u64) -> Self {
        match outcome {
            Outcome::Limited(decision) => {
                let headers = if include_headers {
                    RateLimitHeaders::new()
                        .limit(decision.limit)
                        .remaining(0)
                        .reset(decision.reset)
                        .retry_after(decision.retry_after_secs(now_secs))
                        .to_vec()
                } else {
                    Vec::new()
                };
                Self::Reject(Rejection {
                    status: 429,
                    headers,
                    decision,
                })
            }
            Outcome::Allowed(_) | Outcome::Unevaluated(_) => Self::Pass,
        }
    }

    /// True when the request should proceed.
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clamped_to_now() {
        let decision = Decision::new(true, 10, 0, 50, 100);
        assert_eq!(decision.reset, 100);
        assert_eq!(decision.retry_after_secs(100), 0);
    }

    #[test]
    fn test_outcome_permits() {
        let d = Decision::new(false, 10, 9, 160, 100);
        assert!(Outcome::Allowed(d.clone()).permits());
        assert!(Outcome::Unevaluated(SkipReason::StoreUnavailable).permits());
        assert!(!Outcome::Limited(Decision { limited: true, remaining: 0, ..d }).permits());
    }

    #[test]
    fn test_render_rejection_headers() {
        let decision = Decision::new(true, 5, 0, 130, 100);
        let outcome = HttpOutcome::render(Outcome::Limited(decision), true, 100);

        let HttpOutcome::Reject(rejection) = outcome else {
            panic!("expected a rejection");
        };
        assert_eq!(rejection.status, 429);
        assert!(
            rejection
                .headers
                .iter()
                .any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "0")
        );
        assert!(
            rejection
                .headers
                .iter()
                .any(|(k, v)| *k == "Retry-After" && v == "30")
        );
    }

    #[test]
    fn test_render_unevaluated_is_pass() {
        let outcome = HttpOutcome::render(Outcome::Unevaluated(SkipReason::Bypassed), true, 100);
        assert!(outcome.is_pass());
    }

    #[test]
    fn test_decision_serializes() {
        let decision = Decision::new(false, 3, 2, 170, 100);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["limited"], false);
        assert_eq!(json["remaining"], 2);
    }
}
