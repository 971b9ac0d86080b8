//! Eligibility rules for recovering from an authentication failure.

use reqwest::StatusCode;

/// Path fragments of endpoints where a 401 means bad input rather than an
/// expired session.
pub const DEFAULT_BYPASS: &[&str] = &[
    "login",
    "signup",
    "complete-registration",
    "forgot-password",
    "reset-password",
];

/// Outcome of inspecting a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Refresh the access token and replay the request once.
    Refresh,
    /// Hand the original response back untouched.
    NotEligible(NotEligibleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotEligibleReason {
    /// The response is not an authentication failure.
    NotUnauthorized,
    /// The request targets a bypass-listed endpoint.
    Bypassed,
    /// Recovery was already attempted for this request.
    AlreadyRetried,
}

/// Decides whether an authentication failure is recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    bypass: Vec<String>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BYPASS.iter().map(|s| s.to_string()).collect())
    }
}

impl RecoveryPolicy {
    pub fn new(bypass: Vec<String>) -> Self {
        Self { bypass }
    }

    pub fn bypass(&self) -> &[String] {
        &self.bypass
    }

    /// Substring match of `path` against the bypass list.
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass
            .iter()
            .any(|fragment| !fragment.is_empty() && path.contains(fragment.as_str()))
    }

    pub fn decide(&self, status: StatusCode, path: &str, marker: RetryMarker) -> RecoveryDecision {
        if status != StatusCode::UNAUTHORIZED {
            return RecoveryDecision::NotEligible(NotEligibleReason::NotUnauthorized);
        }
        if marker.is_set() {
            return RecoveryDecision::NotEligible(NotEligibleReason::AlreadyRetried);
        }
        if self.is_bypassed(path) {
            return RecoveryDecision::NotEligible(NotEligibleReason::Bypassed);
        }
        RecoveryDecision::Refresh
    }
}

/// Per-request flag set once recovery has been attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryMarker(bool);

impl RetryMarker {
    #[inline]
    pub fn is_set(self) -> bool {
        self.0
    }

    #[inline]
    pub fn set(&mut self) {
        self.0 = true;
    }
}
