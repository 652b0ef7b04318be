//! DOM snapshot extraction with numbered element references.
//!
//! Interactive elements get stable numeric refs so callers can address them
//! without fragile CSS paths. The node budget caps response size.

use {chromiumoxide::Page, serde_json::Value, tracing::debug};

use crate::{
    error::BrowserError,
    types::{DomSnapshot, ElementBounds, ElementRef, Viewport},
};

/// Parameters for a snapshot extraction.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Cap on returned elements.
    pub max_nodes: usize,
    /// Scope extraction to this subtree when set.
    pub selector: Option<String>,
    /// Include the raw attribute map per element.
    pub include_attributes: bool,
    /// Include a computed-style subset per element.
    pub include_styles: bool,
}

impl Default for SnapshotRequest {
    fn default() -> Self {
        Self {
            max_nodes: 200,
            selector: None,
            include_attributes: false,
            include_styles: false,
        }
    }
}

const EXTRACT_JS: &str = r#"
((maxNodes, scopeSelector, includeAttributes, includeStyles) => {
    const interactive = [
        'a', 'button', 'input', 'select', 'textarea',
        '[role="button"]', '[role="link"]', '[role="checkbox"]',
        '[role="radio"]', '[role="textbox"]', '[role="combobox"]',
        '[role="tab"]', '[role="switch"]', '[onclick]', '[tabindex]'
    ];

    const root = scopeSelector ? document.querySelector(scopeSelector) : document;
    if (!root) return null;

    const elements = root.querySelectorAll(interactive.join(', '));
    const results = [];

    function isVisible(el) {
        const rect = el.getBoundingClientRect();
        const style = getComputedStyle(el);
        return (
            rect.width > 0 &&
            rect.height > 0 &&
            style.visibility !== 'hidden' &&
            style.display !== 'none' &&
            parseFloat(style.opacity) > 0
        );
    }

    function isInViewport(rect) {
        return (
            rect.bottom >= 0 &&
            rect.right >= 0 &&
            rect.top <= window.innerHeight &&
            rect.left <= window.innerWidth
        );
    }

    function getTextContent(el, maxLen = 100) {
        let text = el.innerText || el.textContent || '';
        text = text.trim().replace(/\s+/g, ' ');
        if (text.length > maxLen) {
            text = text.substring(0, maxLen) + '...';
        }
        return text || null;
    }

    function getRole(el) {
        if (el.getAttribute('role')) return el.getAttribute('role');
        const tag = el.tagName.toLowerCase();
        const roleMap = {
            'a': 'link',
            'button': 'button',
            'input': el.type === 'checkbox' ? 'checkbox'
                   : el.type === 'radio' ? 'radio'
                   : el.type === 'submit' || el.type === 'button' ? 'button'
                   : 'textbox',
            'select': 'combobox',
            'textarea': 'textbox'
        };
        return roleMap[tag] || null;
    }

    function isInteractive(el) {
        const tag = el.tagName.toLowerCase();
        if (['a', 'button', 'select'].includes(tag)) return true;
        if (tag === 'input' && el.type !== 'hidden') return true;
        if (tag === 'textarea') return true;
        if (el.getAttribute('onclick')) return true;
        if (el.getAttribute('role')) return true;
        const tabindex = el.getAttribute('tabindex');
        if (tabindex && parseInt(tabindex, 10) >= 0) return true;
        return false;
    }

    let refNum = 1;
    let truncated = false;

    for (const el of elements) {
        if (!isVisible(el)) continue;
        if (results.length >= maxNodes) {
            truncated = true;
            break;
        }

        const rect = el.getBoundingClientRect();
        const entry = {
            ref_: refNum++,
            tag: el.tagName.toLowerCase(),
            role: getRole(el),
            text: getTextContent(el),
            href: el.href || null,
            aria_label: el.getAttribute('aria-label'),
            visible: isInViewport(rect),
            interactive: isInteractive(el),
            bounds: {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height
            }
        };
        if (includeAttributes) {
            const attrs = {};
            for (const a of el.attributes) attrs[a.name] = a.value;
            entry.attributes = attrs;
        }
        if (includeStyles) {
            const style = getComputedStyle(el);
            entry.styles = {
                display: style.display,
                visibility: style.visibility,
                color: style.color,
                backgroundColor: style.backgroundColor,
                fontSize: style.fontSize
            };
        }
        results.push(entry);

        el.dataset.webgateRef = (refNum - 1).toString();
    }

    let content = document.body?.innerText || '';
    content = content.replace(/\s+/g, ' ').trim();
    if (content.length > 8000) {
        content = content.substring(0, 8000) + '... [truncated]';
    }

    return {
        elements: results,
        truncated: truncated,
        content: content || null,
        viewport: {
            width: window.innerWidth,
            height: window.innerHeight
        }
    };
})
"#;

/// Extract a DOM snapshot from the page.
pub async fn extract_snapshot(
    page: &Page,
    request: &SnapshotRequest,
) -> Result<DomSnapshot, BrowserError> {
    let url = page
        .url()
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?
        .unwrap_or_default();

    let title = page
        .get_title()
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?
        .unwrap_or_default();

    let selector_arg = match request.selector {
        Some(ref s) => serde_json::to_string(s).map_err(|e| BrowserError::EvalFailed(e.to_string()))?,
        None => "null".to_string(),
    };
    let js = format!(
        "({EXTRACT_JS})({max_nodes}, {selector_arg}, {include_attributes}, {include_styles})",
        max_nodes = request.max_nodes,
        include_attributes = request.include_attributes,
        include_styles = request.include_styles,
    );

    let result: Value = page
        .evaluate(js.as_str())
        .await
        .map_err(|e| BrowserError::EvalFailed(e.to_string()))?
        .into_value()
        .map_err(|e| BrowserError::EvalFailed(format!("failed to get result: {e:?}")))?;

    if result.is_null() {
        return Err(BrowserError::ElementNotFound(
            request.selector.clone().unwrap_or_default(),
        ));
    }

    let elements = parse_elements(&result)?;
    let content = result
        .get("content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);
    let truncated = result["truncated"].as_bool().unwrap_or(false);
    let viewport = parse_viewport(&result);

    debug!(
        url = url,
        elements = elements.len(),
        truncated,
        "extracted DOM snapshot"
    );

    Ok(DomSnapshot {
        url,
        title,
        content,
        elements,
        truncated,
        viewport,
    })
}

fn parse_elements(result: &Value) -> Result<Vec<ElementRef>, BrowserError> {
    let elements = result["elements"]
        .as_array()
        .ok_or_else(|| BrowserError::EvalFailed("elements not an array".into()))?;

    Ok(elements
        .iter()
        .filter_map(|e| {
            Some(ElementRef {
                ref_: e["ref_"].as_u64()? as u32,
                tag: e["tag"].as_str()?.to_string(),
                role: e["role"].as_str().map(String::from),
                text: e["text"].as_str().map(String::from),
                href: e["href"].as_str().map(String::from),
                aria_label: e["aria_label"].as_str().map(String::from),
                attributes: e
                    .get("attributes")
                    .and_then(|v| v.as_object())
                    .cloned(),
                styles: e.get("styles").and_then(|v| v.as_object()).cloned(),
                visible: e["visible"].as_bool().unwrap_or(false),
                interactive: e["interactive"].as_bool().unwrap_or(false),
                bounds: parse_bounds(&e["bounds"]),
            })
        })
        .collect())
}

fn parse_bounds(v: &Value) -> Option<ElementBounds> {
    Some(ElementBounds {
        x: v["x"].as_f64()?,
        y: v["y"].as_f64()?,
        width: v["width"].as_f64()?,
        height: v["height"].as_f64()?,
    })
}

fn parse_viewport(result: &Value) -> Viewport {
    let v = &result["viewport"];
    Viewport {
        width: v["width"].as_u64().unwrap_or(1280) as u32,
        height: v["height"].as_u64().unwrap_or(720) as u32,
    }
}
