//! Pattern-based extraction from DuckDuckGo response bodies.
//!
//! Not a DOM parser: the HTML endpoint is scanned with a single
//! anchor pattern and the images endpoint is plain JSON.

use duckpipe_core::{Error, Result, SearchResultLink};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::OnceLock;

static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
static VQD_QUOTED_RE: OnceLock<Regex> = OnceLock::new();
static VQD_BARE_RE: OnceLock<Regex> = OnceLock::new();

fn anchor_re() -> &'static Regex {
    // Group 1: the last absolute http(s) URL inside the href (DDG wraps targets in a
    // redirect like `//duckduckgo.com/l/?uddg=https%3A%2F%2F…&rut=…`). Group 2: label text.
    ANCHOR_RE.get_or_init(|| {
        Regex::new(r#"\shref="[^"]*(https?[^?&"]+)[^>]*>([^<]*)"#).expect("anchor regex")
    })
}

fn vqd_quoted_re() -> &'static Regex {
    VQD_QUOTED_RE.get_or_init(|| Regex::new(r#"vqd=["']([^"']+)["']"#).expect("vqd regex"))
}

fn vqd_bare_re() -> &'static Regex {
    VQD_BARE_RE.get_or_init(|| Regex::new(r"vqd=([A-Za-z0-9_-]+)").expect("vqd regex"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_url(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Scan the HTML results page for `(label, url)` pairs.
///
/// - At most `max_results` entries.
/// - Deduped by decoded URL; the first occurrence keeps its label.
pub fn extract_web_links(html: &str, max_results: usize) -> Vec<SearchResultLink> {
    let mut seen = HashSet::<String>::new();
    let mut out = Vec::new();
    if max_results == 0 {
        return out;
    }
    for caps in anchor_re().captures_iter(html) {
        let (Some(raw_url), Some(raw_label)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let url = decode_url(raw_url.as_str());
        if !seen.insert(url.clone()) {
            continue;
        }
        out.push(SearchResultLink {
            label: collapse_whitespace(raw_label.as_str()),
            url,
        });
        if out.len() >= max_results {
            break;
        }
    }
    out
}

/// Pull the `vqd` session token out of the images landing page.
pub fn extract_vqd(html: &str) -> Option<String> {
    if let Some(c) = vqd_quoted_re().captures(html) {
        let token = c.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    vqd_bare_re()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Deserialize)]
struct ImageResultsResponse {
    #[serde(default)]
    results: Vec<ImageResultEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageResultEntry {
    #[serde(default)]
    image: Option<String>,
}

pub fn has_image_extension(raw_url: &str) -> bool {
    let path = url::Url::parse(raw_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw_url.to_string());
    let path = path.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png", ".gif"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Image URLs from the `i.js` JSON body.
///
/// Truncates to `max_results` candidates before filtering, so the result can be shorter
/// than `max_results` even when the upstream page had more entries.
pub fn extract_image_urls(body: &str, max_results: usize) -> Result<Vec<String>> {
    let parsed: ImageResultsResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("image results: {e}")))?;
    Ok(parsed
        .results
        .into_iter()
        .take(max_results)
        .filter_map(|r| r.image)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && has_image_extension(s))
        .collect())
}
