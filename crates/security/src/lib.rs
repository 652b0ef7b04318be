//! Security gate: domain access with interactive permission prompts,
//! per-client rate limiting, and sensitive-data redaction.

pub mod gate;
pub mod ratelimit;
pub mod redact;

pub use {
    gate::{DomainDecision, DomainGate, PermissionNotifier, PermissionRequest, PermissionState},
    ratelimit::{RateLimitSettings, RateLimiter},
    redact::{REDACTION_SENTINEL, is_sensitive_header, is_sensitive_key, redact_body, redact_headers, redact_value},
};
