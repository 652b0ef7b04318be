//! Context fingerprints and DOM snapshot structures.

use serde::{Deserialize, Serialize};

/// Viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The tuple pooled contexts are matched on: a context created for one
/// fingerprint is only ever handed to sessions requesting the same one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ContextFingerprint {
    pub viewport: Viewport,
    pub user_agent: Option<String>,
}

impl std::fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.viewport.width, self.viewport.height)?;
        if let Some(ref ua) = self.user_agent {
            let short: String = ua.chars().take(24).collect();
            write!(f, "/{short}")?;
        }
        Ok(())
    }
}

/// Element reference in a DOM snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ElementRef {
    /// Unique reference number for this element.
    pub ref_: u32,
    /// Tag name (e.g., "button", "input", "a").
    pub tag: String,
    /// Element's role attribute or inferred role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Visible text content (truncated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Link href (for anchor elements).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// aria-label attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    /// Raw attributes, present when the caller asked for them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    /// Computed-style subset, present when the caller asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<serde_json::Map<String, serde_json::Value>>,
    /// Whether the element is visible in the viewport.
    pub visible: bool,
    /// Whether the element is interactive (clickable/editable).
    pub interactive: bool,
    /// Bounding box in viewport coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<ElementBounds>,
}

/// Bounding box for an element.
#[derive(Debug, Clone, Serialize)]
pub struct ElementBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// DOM snapshot with element references.
#[derive(Debug, Clone, Serialize)]
pub struct DomSnapshot {
    /// Current page URL.
    pub url: String,
    /// Page title.
    pub title: String,
    /// Page text content (body innerText, truncated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Elements with reference numbers, capped at the caller's node budget.
    pub elements: Vec<ElementRef>,
    /// True when the node budget cut the element list short.
    pub truncated: bool,
    /// Viewport dimensions.
    pub viewport: Viewport,
}
