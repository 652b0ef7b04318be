//! Leaf driver operations executed against a session's primary page.

use {
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    chromiumoxide::{
        Page,
        cdp::browser_protocol::{
            input::{
                DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                DispatchMouseEventType, MouseButton,
            },
            page::CaptureScreenshotFormat,
            performance,
        },
        page::ScreenshotParams,
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::time::Duration,
    tracing::debug,
};

use crate::error::BrowserError;

/// How long a navigation should wait before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[default]
    Load,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

/// Outcome of a navigation.
#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16,
}

/// Navigate and wait according to `wait_until`.
pub async fn navigate(
    page: &Page,
    url: &str,
    wait_until: WaitUntil,
) -> Result<NavigationResult, BrowserError> {
    validate_url(url)?;

    page.goto(url)
        .await
        .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

    match wait_until {
        WaitUntil::DomContentLoaded => {},
        WaitUntil::Load | WaitUntil::NetworkIdle => {
            let _ = page.wait_for_navigation().await;
        },
    }

    let current_url = page
        .url()
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?
        .unwrap_or_default();
    let title = page
        .get_title()
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?
        .unwrap_or_default();

    // Chromium reports the main document's HTTP status on the navigation
    // timing entry; schemes without one (data:, about:) report 0.
    let status: Option<u16> = page
        .evaluate(
            "(() => { const e = performance.getEntriesByType('navigation')[0]; \
             return e && 'responseStatus' in e ? e.responseStatus : null })()",
        )
        .await
        .ok()
        .and_then(|v| v.into_value().ok());

    debug!(url = current_url, "navigated");
    Ok(NavigationResult {
        url: current_url,
        title,
        status: status.filter(|s| *s != 0).unwrap_or(200),
    })
}

/// Offset from an element's top-left corner for positioned clicks.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClickPosition {
    pub x: f64,
    pub y: f64,
}

/// Click the first element matching `selector`.
///
/// `force` skips the visibility check; `position` clicks at an offset from
/// the element's top-left corner instead of its center.
pub async fn click(
    page: &Page,
    selector: &str,
    force: bool,
    position: Option<ClickPosition>,
) -> Result<(), BrowserError> {
    let rect = locate(page, selector, force).await?;
    let (x, y) = match position {
        Some(pos) => (rect.x + pos.x, rect.y + pos.y),
        None => (rect.x + rect.width / 2.0, rect.y + rect.height / 2.0),
    };

    // Scrolling settles before the coordinates are used.
    tokio::time::sleep(Duration::from_millis(50)).await;

    dispatch_click(page, x, y).await?;
    debug!(selector, x, y, "clicked element");
    Ok(())
}

/// Click via the DOM instead of synthesized input. Used as the fallback
/// interaction path when a trusted click fails.
pub async fn click_via_dom(page: &Page, selector: &str) -> Result<(), BrowserError> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.click();
            return true;
        }})()"#,
        sel = js_string(selector)?
    );
    let clicked: bool = eval_into(page, &js).await?;
    if !clicked {
        return Err(BrowserError::ElementNotFound(selector.to_string()));
    }
    Ok(())
}

/// Type text into the element matching `selector`, one key event pair per
/// character, with an optional inter-key delay.
pub async fn type_text(
    page: &Page,
    selector: &str,
    text: &str,
    delay: Option<Duration>,
    clear: bool,
) -> Result<(), BrowserError> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.focus();
            if ({clear}) {{
                el.value = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            }}
            return true;
        }})()"#,
        sel = js_string(selector)?,
        clear = clear,
    );
    let focused: bool = eval_into(page, &js).await?;
    if !focused {
        return Err(BrowserError::ElementNotFound(selector.to_string()));
    }

    for c in text.chars() {
        let key_down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .text(c.to_string())
            .build()
            .map_err(BrowserError::InteractionFailed)?;
        page.execute(key_down)
            .await
            .map_err(|e| BrowserError::InteractionFailed(e.to_string()))?;

        let key_up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .text(c.to_string())
            .build()
            .map_err(BrowserError::InteractionFailed)?;
        page.execute(key_up)
            .await
            .map_err(|e| BrowserError::InteractionFailed(e.to_string()))?;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    debug!(selector, chars = text.len(), "typed text");
    Ok(())
}

/// Select an option by value in a `<select>` element.
pub async fn select_option(page: &Page, selector: &str, value: &str) -> Result<(), BrowserError> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return 'missing';
            const match = Array.from(el.options || []).some(o => o.value === {val});
            if (!match) return 'no-option';
            el.value = {val};
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return 'ok';
        }})()"#,
        sel = js_string(selector)?,
        val = js_string(value)?,
    );
    let outcome: String = eval_into(page, &js).await?;
    match outcome.as_str() {
        "ok" => {
            debug!(selector, value, "selected option");
            Ok(())
        },
        "missing" => Err(BrowserError::ElementNotFound(selector.to_string())),
        _ => Err(BrowserError::InteractionFailed(format!(
            "no option with value '{value}' in {selector}"
        ))),
    }
}

/// Screenshot request shape.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotRequest {
    pub full_page: bool,
    pub selector: Option<String>,
    /// "png" (default) or "jpeg".
    pub format: Option<String>,
    /// JPEG quality 0-100.
    pub quality: Option<u32>,
    pub clip: Option<ClipRect>,
    pub omit_background: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Capture a screenshot, base64-encoded, plus the format actually used.
pub async fn screenshot(
    page: &Page,
    request: &ScreenshotRequest,
) -> Result<(String, &'static str), BrowserError> {
    let (format, format_name) = match request.format.as_deref() {
        None | Some("png") => (CaptureScreenshotFormat::Png, "png"),
        Some("jpeg") | Some("jpg") => (CaptureScreenshotFormat::Jpeg, "jpeg"),
        Some(other) => {
            return Err(BrowserError::ScreenshotFailed(format!(
                "unsupported format '{other}', expected png or jpeg"
            )));
        },
    };

    if let Some(ref selector) = request.selector {
        let element = page
            .find_element(selector.as_str())
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.clone()))?;
        let bytes = element
            .screenshot(format)
            .await
            .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))?;
        return Ok((BASE64.encode(&bytes), format_name));
    }

    let mut builder = ScreenshotParams::builder()
        .format(format)
        .full_page(request.full_page)
        .omit_background(request.omit_background);
    if let Some(quality) = request.quality {
        builder = builder.quality(i64::from(quality.min(100)));
    }
    if let Some(clip) = request.clip {
        builder = builder.clip(chromiumoxide::cdp::browser_protocol::page::Viewport {
            x: clip.x,
            y: clip.y,
            width: clip.width,
            height: clip.height,
            scale: 1.0,
        });
    }

    let bytes = page
        .screenshot(builder.build())
        .await
        .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))?;

    debug!(bytes = bytes.len(), format = format_name, "took screenshot");
    Ok((BASE64.encode(&bytes), format_name))
}

/// Execute JavaScript in the page and return the JSON value it produced.
pub async fn evaluate(page: &Page, code: &str) -> Result<Value, BrowserError> {
    let result: Value = page
        .evaluate(code)
        .await
        .map_err(|e| BrowserError::EvalFailed(e.to_string()))?
        .into_value()
        .map_err(|e| BrowserError::EvalFailed(format!("{e:?}")))?;
    Ok(result)
}

/// Enable performance telemetry collection for the page.
pub async fn trace_start(page: &Page) -> Result<(), BrowserError> {
    page.execute(performance::EnableParams::default())
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?;
    Ok(())
}

/// Stop collection and return the gathered metrics.
pub async fn trace_stop(page: &Page) -> Result<Value, BrowserError> {
    let metrics = page
        .execute(performance::GetMetricsParams::default())
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?;
    let entries: Vec<Value> = metrics
        .result
        .metrics
        .iter()
        .map(|m| serde_json::json!({ "name": m.name, "value": m.value }))
        .collect();
    page.execute(performance::DisableParams::default())
        .await
        .map_err(|e| BrowserError::Cdp(e.to_string()))?;
    Ok(Value::Array(entries))
}

// ── Internals ───────────────────────────────────────────────────────────────

struct ElementRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Find an element, scroll it into view, and return its viewport rect.
async fn locate(page: &Page, selector: &str, force: bool) -> Result<ElementRect, BrowserError> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return null;
            el.scrollIntoView({{ behavior: 'instant', block: 'center' }});
            const rect = el.getBoundingClientRect();
            const style = getComputedStyle(el);
            const visible = rect.width > 0 && rect.height > 0 &&
                style.visibility !== 'hidden' && style.display !== 'none';
            return {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height, visible }};
        }})()"#,
        sel = js_string(selector)?
    );
    let value: Value = eval_into(page, &js).await?;
    if value.is_null() {
        return Err(BrowserError::ElementNotFound(selector.to_string()));
    }
    let visible = value["visible"].as_bool().unwrap_or(false);
    if !visible && !force {
        return Err(BrowserError::InteractionFailed(format!(
            "element '{selector}' is not visible (pass force to click anyway)"
        )));
    }
    Ok(ElementRect {
        x: value["x"].as_f64().unwrap_or(0.0),
        y: value["y"].as_f64().unwrap_or(0.0),
        width: value["width"].as_f64().unwrap_or(0.0),
        height: value["height"].as_f64().unwrap_or(0.0),
    })
}

async fn dispatch_click(page: &Page, x: f64, y: f64) -> Result<(), BrowserError> {
    let press = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MousePressed)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(BrowserError::InteractionFailed)?;
    page.execute(press)
        .await
        .map_err(|e| BrowserError::InteractionFailed(e.to_string()))?;

    let release = DispatchMouseEventParams::builder()
        .r#type(DispatchMouseEventType::MouseReleased)
        .x(x)
        .y(y)
        .button(MouseButton::Left)
        .click_count(1)
        .build()
        .map_err(BrowserError::InteractionFailed)?;
    page.execute(release)
        .await
        .map_err(|e| BrowserError::InteractionFailed(e.to_string()))?;
    Ok(())
}

async fn eval_into<T: serde::de::DeserializeOwned>(
    page: &Page,
    js: &str,
) -> Result<T, BrowserError> {
    page.evaluate(js)
        .await
        .map_err(|e| BrowserError::EvalFailed(e.to_string()))?
        .into_value()
        .map_err(|e| BrowserError::EvalFailed(format!("{e:?}")))
}

/// JSON-encode a string for safe embedding in generated JavaScript.
fn js_string(s: &str) -> Result<String, BrowserError> {
    serde_json::to_string(s).map_err(|e| BrowserError::EvalFailed(e.to_string()))
}

/// Validate a URL before attempting navigation: parseable, http(s) or data
/// scheme, no obvious garbage.
pub fn validate_url(url: &str) -> Result<(), BrowserError> {
    if url.is_empty() {
        return Err(BrowserError::NavigationFailed("URL cannot be empty".into()));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| BrowserError::NavigationFailed(format!("invalid URL '{}': {e}", truncate(url))))?;

    match parsed.scheme() {
        "http" | "https" | "data" | "about" => {},
        scheme => {
            return Err(BrowserError::NavigationFailed(format!(
                "unsupported URL scheme '{scheme}', only http/https/data allowed"
            )));
        },
    }

    Ok(())
}

/// Truncate a URL for error messages.
fn truncate(url: &str) -> String {
    if url.len() > 100 {
        format!("{}...", &url[..100])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_url_accepts_http_and_data() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://localhost:8080/path").is_ok());
        assert!(validate_url("data:text/html,<h1>x</h1>").is_ok());
    }

    #[test]
    fn validate_url_rejects_bad_input() {
        assert!(validate_url("").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#).unwrap_or_default(), r#""a\"b""#);
        assert_eq!(js_string("#login").unwrap_or_default(), r##""#login""##);
    }

    #[test]
    fn wait_until_parses_wire_names() {
        let w: WaitUntil = serde_json::from_str("\"domcontentloaded\"").unwrap_or_default();
        assert_eq!(w, WaitUntil::DomContentLoaded);
        let w: WaitUntil = serde_json::from_str("\"networkidle\"").unwrap_or_default();
        assert_eq!(w, WaitUntil::NetworkIdle);
        let w: WaitUntil = serde_json::from_str("\"load\"").unwrap_or_default();
        assert_eq!(w, WaitUntil::Load);
    }
}
