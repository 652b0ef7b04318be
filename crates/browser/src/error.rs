//! Browser error types and inference into the gateway taxonomy.

use thiserror::Error;

use webgate_protocol::{ErrorCode, GatewayError};

/// Errors that can occur during browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser not available: Chrome/Chromium not found")]
    NotAvailable,

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("context creation failed: {0}")]
    ContextCreateFailed(String),

    #[error("context reset failed: {0}")]
    ResetFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    InteractionFailed(String),

    #[error("JavaScript evaluation failed: {0}")]
    EvalFailed(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("CDP error: {0}")]
    Cdp(String),
}

/// Substrings that indicate the driver connection or target is dead.
const CRASH_PATTERNS: &[&str] = &[
    "crashed",
    "disconnected",
    "Target closed",
    "receiver is gone",
    "oneshot canceled",
    "Connection closed",
    "AlreadyClosed",
    "closed connection",
];

/// Substrings that indicate the failure happened in the network, not the
/// browser.
const NETWORK_PATTERNS: &[&str] = &[
    "ENOTFOUND",
    "ERR_NAME_NOT_RESOLVED",
    "ERR_CONNECTION_REFUSED",
    "ERR_CONNECTION_RESET",
    "ERR_INTERNET_DISCONNECTED",
    "ERR_ADDRESS_UNREACHABLE",
    "dns error",
];

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "Timeout"];

/// Infer a taxonomy code from a raw driver error message. `fallback` is used
/// when no pattern matches (the caller knows which operation failed).
#[must_use]
pub fn infer_code(message: &str, fallback: ErrorCode) -> ErrorCode {
    if CRASH_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCode::ContextCrashed;
    }
    if NETWORK_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCode::NetworkError;
    }
    if TIMEOUT_PATTERNS.iter().any(|p| message.contains(p)) {
        return ErrorCode::Timeout;
    }
    fallback
}

impl BrowserError {
    /// Returns `true` when this error indicates the driver connection or the
    /// target is dead and the context should be recycled.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        matches!(self.code(), ErrorCode::ContextCrashed | ErrorCode::PageCrashed)
    }

    /// The taxonomy code this error maps to. Message-bearing variants are
    /// classified by content first so a crash inside a navigation surfaces as
    /// a crash, not a navigation failure.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAvailable | Self::LaunchFailed(_) => ErrorCode::ServiceUnavailable,
            Self::ContextCreateFailed(msg) | Self::ResetFailed(msg) => {
                infer_code(msg, ErrorCode::ContextCrashed)
            },
            Self::NavigationFailed(msg) => infer_code(msg, ErrorCode::NavigationFailed),
            Self::ElementNotFound(_) => ErrorCode::ElementNotFound,
            Self::InteractionFailed(msg) => infer_code(msg, ErrorCode::InteractionFailed),
            Self::EvalFailed(msg) => infer_code(msg, ErrorCode::EvaluationFailed),
            Self::ScreenshotFailed(msg) => infer_code(msg, ErrorCode::InteractionFailed),
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Cdp(msg) => infer_code(msg, ErrorCode::InternalError),
        }
    }

    /// Lift into the structured gateway error.
    #[must_use]
    pub fn into_gateway(self) -> GatewayError {
        GatewayError::new(self.code(), self.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::Cdp(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_text_maps_to_timeout() {
        assert_eq!(
            infer_code("Request timed out.", ErrorCode::NavigationFailed),
            ErrorCode::Timeout
        );
        assert_eq!(
            BrowserError::NavigationFailed("page load timeout after 30000ms".into()).code(),
            ErrorCode::Timeout
        );
    }

    #[test]
    fn dns_errors_map_to_network() {
        assert_eq!(
            infer_code("net::ERR_NAME_NOT_RESOLVED", ErrorCode::NavigationFailed),
            ErrorCode::NetworkError
        );
        assert_eq!(
            infer_code("getaddrinfo ENOTFOUND blocked.test", ErrorCode::NavigationFailed),
            ErrorCode::NetworkError
        );
    }

    #[test]
    fn crash_text_maps_to_context_crashed() {
        for msg in [
            "Target crashed",
            "browser disconnected",
            "send failed because receiver is gone",
            "oneshot canceled",
            "Connection closed by peer",
            "AlreadyClosed",
        ] {
            assert_eq!(
                infer_code(msg, ErrorCode::NavigationFailed),
                ErrorCode::ContextCrashed,
                "{msg}"
            );
        }
    }

    #[test]
    fn unmatched_text_uses_fallback() {
        assert_eq!(
            infer_code("something odd happened", ErrorCode::NavigationFailed),
            ErrorCode::NavigationFailed
        );
        assert_eq!(
            BrowserError::EvalFailed("ReferenceError: x is not defined".into()).code(),
            ErrorCode::EvaluationFailed
        );
    }

    #[test]
    fn crash_detection_covers_wrapped_messages() {
        assert!(BrowserError::Cdp("Connection closed".into()).is_crash());
        assert!(BrowserError::EvalFailed("target crashed".into()).is_crash());
        assert!(!BrowserError::ElementNotFound("#missing".into()).is_crash());
    }

    #[test]
    fn gateway_error_carries_message() {
        let err = BrowserError::Timeout("goto deadline".into()).into_gateway();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("goto deadline"));
        assert!(err.retryable);
    }
}
