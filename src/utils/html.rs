//! Best-effort HTML scrubbing for user-rendered snippets.
//!
//! This is a pattern filter, not an HTML parser: it removes whole elements
//! that can run script or submit data, and inline event-handler attributes
//! with quoted values.

use once_cell::sync::Lazy;
use regex::Regex;

pub const BLOCKED_TAGS: &[&str] = &[
    "script", "iframe", "object", "embed", "form", "input", "button",
];

pub const BLOCKED_ATTRIBUTES: &[&str] = &["onclick", "onload", "onerror", "onmouseover", "onfocus"];

static TAG_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).ok())
        .collect()
});

static ATTRIBUTE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_ATTRIBUTES
        .iter()
        .filter_map(|attr| Regex::new(&format!(r#"(?i){attr}=["'][^"']*["']"#)).ok())
        .collect()
});

/// Remove blocked elements and event-handler attributes from `html`.
pub fn render_safe_html(html: &str) -> String {
    let mut sanitized = html.to_string();
    for pattern in TAG_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }
    for pattern in ATTRIBUTE_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }
    sanitized
}
