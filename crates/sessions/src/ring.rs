//! Bounded FIFO buffers for recent console and network events.

use std::collections::{HashMap, VecDeque};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use webgate_security::{redact_body, redact_headers};

/// Console entries kept per session.
pub const CONSOLE_CAPACITY: usize = 500;
/// Network entries kept per session.
pub const NETWORK_CAPACITY: usize = 200;
/// Captured bodies are cut at this many bytes before redaction.
pub const BODY_CAP_BYTES: usize = 16 * 1024;

/// Fixed-capacity FIFO; oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &T> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

/// Console message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    /// Map a CDP console API type string onto the level set.
    #[must_use]
    pub fn from_api_type(api_type: &str) -> Self {
        match api_type {
            "debug" => Self::Debug,
            "warning" => Self::Warn,
            "error" | "assert" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Where a console message originated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    pub url: String,
    pub line: u32,
    pub column: u32,
}

/// One captured console event.
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ConsoleLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// One captured network exchange, redacted before insertion.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub duration_ms: u64,
}

impl NetworkEntry {
    /// Build an entry with headers and bodies redacted and bodies capped.
    /// Sensitive values never reach the ring buffer.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn redacted(
        timestamp: DateTime<Utc>,
        method: String,
        url: String,
        status: u16,
        mut request_headers: HashMap<String, String>,
        mut response_headers: HashMap<String, String>,
        request_body: Option<String>,
        response_body: Option<String>,
        duration_ms: u64,
    ) -> Self {
        redact_headers(&mut request_headers);
        redact_headers(&mut response_headers);
        Self {
            timestamp,
            method,
            url,
            status,
            request_headers,
            response_headers,
            request_body: request_body.map(|b| redact_body(&cap(b))),
            response_body: response_body.map(|b| redact_body(&cap(b))),
            duration_ms,
        }
    }

    /// The entry without bodies, for callers that did not ask for them.
    #[must_use]
    pub fn without_bodies(&self) -> Self {
        Self {
            request_body: None,
            response_body: None,
            ..self.clone()
        }
    }
}

fn cap(body: String) -> String {
    if body.len() <= BODY_CAP_BYTES {
        return body;
    }
    let mut end = BODY_CAP_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
