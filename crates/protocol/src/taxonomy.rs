//! Closed error vocabulary: categories, codes, and the structured error every
//! subsystem raises. String forms exist only at the serialization edge.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Top-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Protocol,
    Security,
    Browser,
    System,
}

/// Stable error codes. Each belongs to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // protocol
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    // security
    RateLimitExceeded,
    PermissionTimeout,
    DomainDenied,
    Unauthorized,
    // browser
    Timeout,
    NavigationFailed,
    ElementNotFound,
    EvaluationFailed,
    ContextCrashed,
    PageCrashed,
    InteractionFailed,
    // system
    NetworkError,
    ServiceUnavailable,
    ResourceExhausted,
    OutOfMemory,
    DiskFull,
    CircuitOpen,
}

impl ErrorCode {
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            InvalidRequest | MethodNotFound | InvalidParams | InternalError => {
                ErrorCategory::Protocol
            },
            RateLimitExceeded | PermissionTimeout | DomainDenied | Unauthorized => {
                ErrorCategory::Security
            },
            Timeout | NavigationFailed | ElementNotFound | EvaluationFailed | ContextCrashed
            | PageCrashed | InteractionFailed => ErrorCategory::Browser,
            NetworkError | ServiceUnavailable | ResourceExhausted | OutOfMemory | DiskFull
            | CircuitOpen => ErrorCategory::System,
        }
    }

    /// Stable ASCII identifier carried on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        use ErrorCode::*;
        match self {
            InvalidRequest => "INVALID_REQUEST",
            MethodNotFound => "METHOD_NOT_FOUND",
            InvalidParams => "INVALID_PARAMS",
            InternalError => "INTERNAL_ERROR",
            RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            PermissionTimeout => "PERMISSION_TIMEOUT",
            DomainDenied => "DOMAIN_DENIED",
            Unauthorized => "UNAUTHORIZED",
            Timeout => "TIMEOUT",
            NavigationFailed => "NAVIGATION_FAILED",
            ElementNotFound => "ELEMENT_NOT_FOUND",
            EvaluationFailed => "EVALUATION_FAILED",
            ContextCrashed => "CONTEXT_CRASHED",
            PageCrashed => "PAGE_CRASHED",
            InteractionFailed => "INTERACTION_FAILED",
            NetworkError => "NETWORK_ERROR",
            ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ResourceExhausted => "RESOURCE_EXHAUSTED",
            OutOfMemory => "OUT_OF_MEMORY",
            DiskFull => "DISK_FULL",
            CircuitOpen => "CIRCUIT_OPEN",
        }
    }

    /// Parse a wire identifier back into the closed enum.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        use ErrorCode::*;
        Some(match s {
            "INVALID_REQUEST" => InvalidRequest,
            "METHOD_NOT_FOUND" => MethodNotFound,
            "INVALID_PARAMS" => InvalidParams,
            "INTERNAL_ERROR" => InternalError,
            "RATE_LIMIT_EXCEEDED" => RateLimitExceeded,
            "PERMISSION_TIMEOUT" => PermissionTimeout,
            "DOMAIN_DENIED" => DomainDenied,
            "UNAUTHORIZED" => Unauthorized,
            "TIMEOUT" => Timeout,
            "NAVIGATION_FAILED" => NavigationFailed,
            "ELEMENT_NOT_FOUND" => ElementNotFound,
            "EVALUATION_FAILED" => EvaluationFailed,
            "CONTEXT_CRASHED" => ContextCrashed,
            "PAGE_CRASHED" => PageCrashed,
            "INTERACTION_FAILED" => InteractionFailed,
            "NETWORK_ERROR" => NetworkError,
            "SERVICE_UNAVAILABLE" => ServiceUnavailable,
            "RESOURCE_EXHAUSTED" => ResourceExhausted,
            "OUT_OF_MEMORY" => OutOfMemory,
            "DISK_FULL" => DiskFull,
            "CIRCUIT_OPEN" => CircuitOpen,
            _ => return None,
        })
    }

    /// Default recoverability: whether the recovery engine should look at
    /// this error at all.
    #[must_use]
    pub fn default_recoverable(self) -> bool {
        use ErrorCode::*;
        !matches!(
            self,
            InvalidRequest
                | MethodNotFound
                | InvalidParams
                | DomainDenied
                | Unauthorized
                | OutOfMemory
                | DiskFull
        )
    }

    /// Default retryability: whether the *caller* may usefully retry.
    #[must_use]
    pub fn default_retryable(self) -> bool {
        use ErrorCode::*;
        matches!(
            self,
            Timeout
                | NavigationFailed
                | ElementNotFound
                | EvaluationFailed
                | InteractionFailed
                | RateLimitExceeded
                | PermissionTimeout
                | NetworkError
                | ServiceUnavailable
                | InternalError
                | CircuitOpen
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown error code: {s}")))
    }
}

// ── Structured error ────────────────────────────────────────────────────────

/// The structured error every layer raises and the wire carries in `data`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}/{}: {message}", code.category().as_tag(), code)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub context: Map<String, Value>,
    pub recoverable: bool,
    pub retryable: bool,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_tag(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Security => "security",
            Self::Browser => "browser",
            Self::System => "system",
        }
    }
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
            context: Map::new(),
            recoverable: code.default_recoverable(),
            retryable: code.default_retryable(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Attach a context entry. Context never carries more than the caller
    /// already supplied.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn non_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// Wire shape of the `data` member: category, code, ISO-8601 timestamp,
    /// context object, and the two caller-facing booleans.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "category": self.category().as_tag(),
            "code": self.code.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
            "context": Value::Object(self.context.clone()),
            "recoverable": self.recoverable,
            "retryable": self.retryable,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_code_roundtrips_through_wire_form() {
        use ErrorCode::*;
        let all = [
            InvalidRequest,
            MethodNotFound,
            InvalidParams,
            InternalError,
            RateLimitExceeded,
            PermissionTimeout,
            DomainDenied,
            Unauthorized,
            Timeout,
            NavigationFailed,
            ElementNotFound,
            EvaluationFailed,
            ContextCrashed,
            PageCrashed,
            InteractionFailed,
            NetworkError,
            ServiceUnavailable,
            ResourceExhausted,
            OutOfMemory,
            DiskFull,
            CircuitOpen,
        ];
        for code in all {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("NOT_A_CODE"), None);
    }

    #[test]
    fn categories_match_the_taxonomy() {
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Browser);
        assert_eq!(
            ErrorCode::DomainDenied.category(),
            ErrorCategory::Security
        );
        assert_eq!(ErrorCode::DiskFull.category(), ErrorCategory::System);
        assert_eq!(
            ErrorCode::MethodNotFound.category(),
            ErrorCategory::Protocol
        );
    }

    #[test]
    fn wire_shape_carries_all_members() {
        let err = GatewayError::new(ErrorCode::DomainDenied, "blocked.test is not allowed")
            .with_context("domain", "blocked.test");
        let wire = err.to_wire();
        assert_eq!(wire["category"], "security");
        assert_eq!(wire["code"], "DOMAIN_DENIED");
        assert_eq!(wire["context"]["domain"], "blocked.test");
        assert_eq!(wire["recoverable"], false);
        assert_eq!(wire["retryable"], false);
        // RFC 3339 timestamps parse back.
        assert!(
            DateTime::parse_from_rfc3339(wire["timestamp"].as_str().unwrap()).is_ok()
        );
    }

    #[test]
    fn fatal_system_codes_are_not_recoverable() {
        assert!(!ErrorCode::OutOfMemory.default_recoverable());
        assert!(!ErrorCode::DiskFull.default_recoverable());
        assert!(ErrorCode::ResourceExhausted.default_recoverable());
    }

    #[test]
    fn display_includes_category_and_code() {
        let err = GatewayError::new(ErrorCode::Timeout, "navigation timed out");
        assert_eq!(err.to_string(), "browser/TIMEOUT: navigation timed out");
    }
}
