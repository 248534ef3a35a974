use crate::rate_limit::DEFAULT_MIN_INTERVAL;
use crate::request::Endpoints;
use crate::ToolContext;
use duckpipe_core::{
    ConfigSource, Result, SafeSearch, CONFIG_AUTO, CONFIG_PAGE_SIZE, CONFIG_SAFE_SEARCH,
    DEFAULT_PAGE_SIZE, MAX_RESULTS_PER_PAGE,
};
use std::time::Duration;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Host configuration read from `DUCKPIPE_<KEY>` environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfig;

impl EnvConfig {
    pub fn var_name(key: &str) -> String {
        format!("DUCKPIPE_{}", key.trim().to_ascii_uppercase())
    }
}

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// A host value that is present and not the `auto` sentinel.
fn host_value(config: &dyn ConfigSource, key: &str) -> Option<String> {
    config
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(CONFIG_AUTO))
}

/// Host config (when not `auto`) > call argument > default.
pub fn resolve_page_size(arg: Option<usize>, ctx: &ToolContext) -> usize {
    if let Some(raw) = host_value(ctx.config.as_ref(), CONFIG_PAGE_SIZE) {
        match raw.parse::<usize>() {
            Ok(n) if (1..=MAX_RESULTS_PER_PAGE).contains(&n) => return n,
            _ => ctx.warn(&format!(
                "Ignoring invalid {CONFIG_PAGE_SIZE} configuration {raw:?} (expected 1-{MAX_RESULTS_PER_PAGE} or \"{CONFIG_AUTO}\")."
            )),
        }
    }
    arg.unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Host config (when not `auto`) > call argument > `moderate`.
pub fn resolve_safe_search(arg: Option<SafeSearch>, ctx: &ToolContext) -> SafeSearch {
    if let Some(raw) = host_value(ctx.config.as_ref(), CONFIG_SAFE_SEARCH) {
        match raw.parse::<SafeSearch>() {
            Ok(s) => return s,
            Err(_) => ctx.warn(&format!(
                "Ignoring invalid {CONFIG_SAFE_SEARCH} configuration {raw:?} (expected strict, moderate, off or \"{CONFIG_AUTO}\")."
            )),
        }
    }
    arg.unwrap_or_default()
}

fn u64_from_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Provider-level knobs (not per-call).
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub endpoints: Endpoints,
    pub min_interval: Duration,
    pub settle_delay: Duration,
    pub timeout: Duration,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            min_interval: DEFAULT_MIN_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl ToolSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            endpoints: Endpoints::from_env()?,
            min_interval: u64_from_env("DUCKPIPE_MIN_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_interval),
            settle_delay: u64_from_env("DUCKPIPE_SETTLE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            // Keep a conservative cap even if callers pass something huge.
            timeout: Duration::from_millis(
                u64_from_env("DUCKPIPE_TIMEOUT_MS")
                    .unwrap_or(DEFAULT_TIMEOUT_MS)
                    .clamp(1_000, 60_000),
            ),
        })
    }
}
