use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Returned (not raised) when the host cancels an in-flight call.
pub const ABORTED: &str = "Search aborted by user.";
pub const NO_WEB_PAGES: &str = "No web pages found for the query.";
pub const NO_IMAGES: &str = "No images found for the query.";

/// Host-side page size bound (`SearchRequest.results_per_page`).
pub const MAX_RESULTS_PER_PAGE: usize = 100;
/// Tool-argument page size bound; hosts may configure larger pages.
pub const MAX_TOOL_PAGE_SIZE: usize = 10;
pub const MAX_PAGE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: usize = 5;

pub const CONFIG_PAGE_SIZE: &str = "page_size";
pub const CONFIG_SAFE_SEARCH: &str = "safe_search";
/// The one "defer to the call argument" sentinel for every configuration key.
pub const CONFIG_AUTO: &str = "auto";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// Non-success HTTP status from one of the request stages.
    #[error("Failed to fetch {stage}: {reason}")]
    Transport {
        stage: &'static str,
        status: u16,
        reason: String,
    },
    #[error("{0}")]
    Http(String),
    #[error("Unable to extract vqd token.")]
    MissingToken,
    #[error("parse failed: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("Search aborted by user.")]
    Cancelled,
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The string a tool hands back to its host for this failure.
    pub fn to_tool_message(&self) -> String {
        match self {
            Error::Cancelled => ABORTED.to_string(),
            other => format!("Error: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeSearch {
    #[serde(alias = "on")]
    Strict,
    #[default]
    Moderate,
    Off,
}

impl SafeSearch {
    pub fn as_str(self) -> &'static str {
        match self {
            SafeSearch::Strict => "strict",
            SafeSearch::Moderate => "moderate",
            SafeSearch::Off => "off",
        }
    }

    /// Value of the upstream `p` parameter. Moderate is the upstream default and sends nothing.
    pub fn upstream_param(self) -> Option<&'static str> {
        match self {
            SafeSearch::Strict => Some("1"),
            SafeSearch::Moderate => None,
            SafeSearch::Off => Some("-1"),
        }
    }
}

impl fmt::Display for SafeSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafeSearch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "on" => Ok(SafeSearch::Strict),
            "moderate" => Ok(SafeSearch::Moderate),
            "off" => Ok(SafeSearch::Off),
            other => Err(Error::InvalidParams(format!(
                "unknown safe_search value {other:?} (allowed: strict, moderate, off)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub results_per_page: usize,
    pub safe_search: SafeSearch,
    pub page: u32,
}

impl SearchRequest {
    pub fn new(
        query: impl Into<String>,
        results_per_page: usize,
        safe_search: SafeSearch,
        page: u32,
    ) -> Result<Self> {
        let req = Self {
            query: query.into(),
            results_per_page,
            safe_search,
            page,
        };
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidParams("query must be non-empty".to_string()));
        }
        if !(1..=MAX_RESULTS_PER_PAGE).contains(&self.results_per_page) {
            return Err(Error::InvalidParams(format!(
                "results_per_page must be within 1..={MAX_RESULTS_PER_PAGE}"
            )));
        }
        if self.page == 0 {
            return Err(Error::InvalidParams("page must be >= 1".to_string()));
        }
        Ok(())
    }

    /// Start index into the upstream result set; only pages after the first carry one.
    pub fn offset(&self) -> Option<usize> {
        if self.page > 1 {
            Some(self.results_per_page * (self.page as usize - 1))
        } else {
            None
        }
    }
}

/// One web result. Serializes as `[label, url]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(String, String)", from = "(String, String)")]
pub struct SearchResultLink {
    pub label: String,
    pub url: String,
}

impl From<SearchResultLink> for (String, String) {
    fn from(l: SearchResultLink) -> Self {
        (l.label, l.url)
    }
}

impl From<(String, String)> for SearchResultLink {
    fn from((label, url): (String, String)) -> Self {
        Self { label, url }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageResult {
    Remote { source_url: String },
    Saved { source_url: String, local_path: String },
    Failed { source_url: String },
}

impl ImageResult {
    pub fn source_url(&self) -> &str {
        match self {
            ImageResult::Remote { source_url }
            | ImageResult::Saved { source_url, .. }
            | ImageResult::Failed { source_url } => source_url,
        }
    }

    pub fn local_path(&self) -> Option<&str> {
        match self {
            ImageResult::Saved { local_path, .. } => Some(local_path),
            _ => None,
        }
    }
}

/// Request headers for one outbound request. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderSet(BTreeMap<String, String>);

impl HeaderSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.get("User-Agent")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// What a tool hands back to its host.
///
/// Serializes untagged: `{ "links": [[label, url]], "count": n }`, a bare array of
/// image paths/URLs, or a bare string for every sentinel and error outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Links {
        links: Vec<SearchResultLink>,
        count: usize,
    },
    Images(Vec<String>),
    Message(String),
}

impl ToolOutput {
    pub fn links(links: Vec<SearchResultLink>) -> Self {
        let count = links.len();
        ToolOutput::Links { links, count }
    }

    pub fn message(s: impl Into<String>) -> Self {
        ToolOutput::Message(s.into())
    }

    pub fn as_message(&self) -> Option<&str> {
        match self {
            ToolOutput::Message(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, ToolOutput::Message(_))
    }

    /// True for failure strings (`Error: ...`). Sentinels like "no results" are not errors.
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Message(s) if s.starts_with("Error: "))
    }

    /// Plain-text rendering: messages verbatim, structured outputs as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Message(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

impl From<Error> for ToolOutput {
    fn from(e: Error) -> Self {
        ToolOutput::Message(e.to_tool_message())
    }
}

/// Status and warning sinks supplied by the host for one invocation.
pub trait ToolReporter: Send + Sync {
    fn status(&self, msg: &str);
    fn warn(&self, msg: &str);
}

/// Key-value configuration resolved by the host.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

/// A host with no configuration: every key reads as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfig;

impl ConfigSource for NoConfig {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
}
