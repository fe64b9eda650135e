//! Instrument configuration
//!
//! Configuration is read from a JSON file and then overridden from the
//! environment. Every field has a default so an empty object is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AttentionError;

/// Backend used when nothing else is configured
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";

/// Suppression window after an in-app navigation mark.
/// Long enough to cover a page transition, short enough that a real
/// distraction right after navigating is still caught.
pub const DEFAULT_NAV_WINDOW_MS: u64 = 2_000;

/// Blur length that triggers the refocus warning on reading pages
pub const DEFAULT_REFOCUS_WARN_MS: u64 = 5_000;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// When coarse per-bucket active time is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketTimePolicy {
    /// Every page reports its bucket time
    #[default]
    Always,
    /// Only pages with passage context report bucket time
    ContextOnly,
}

impl BucketTimePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Some(Self::Always),
            "context_only" | "context-only" => Some(Self::ContextOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Base URL of the study backend, without trailing slash
    pub api_base: String,
    pub nav_window_ms: u64,
    /// `None` disables the refocus warning everywhere
    pub refocus_warn_ms: Option<u64>,
    pub bucket_time: BucketTimePolicy,
    pub request_timeout_ms: u64,
    /// Where the persistent session store lives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            nav_window_ms: DEFAULT_NAV_WINDOW_MS,
            refocus_warn_ms: Some(DEFAULT_REFOCUS_WARN_MS),
            bucket_time: BucketTimePolicy::Always,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            store_path: None,
        }
    }
}

impl InstrumentConfig {
    pub fn from_json(json: &str) -> Result<Self, AttentionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validated()
    }

    pub fn from_file(path: &Path) -> Result<Self, AttentionError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, AttentionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Apply `ATTN_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, AttentionError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, AttentionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("ATTN_API_BASE") {
            self.api_base = base;
        }
        if let Some(window) = lookup("ATTN_NAV_WINDOW_MS") {
            self.nav_window_ms = parse_ms("ATTN_NAV_WINDOW_MS", &window)?;
        }
        if let Some(warn) = lookup("ATTN_REFOCUS_WARN_MS") {
            self.refocus_warn_ms = if warn.trim().eq_ignore_ascii_case("off") {
                None
            } else {
                Some(parse_ms("ATTN_REFOCUS_WARN_MS", &warn)?)
            };
        }
        if let Some(policy) = lookup("ATTN_BUCKET_TIME") {
            self.bucket_time = BucketTimePolicy::parse(&policy).ok_or_else(|| {
                AttentionError::Config(format!("ATTN_BUCKET_TIME: unknown policy '{}'", policy))
            })?;
        }
        if let Some(path) = lookup("ATTN_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self, AttentionError> {
        self.api_base = self.api_base.trim_end_matches('/').to_string();
        if self.api_base.is_empty() {
            return Err(AttentionError::Config("api_base must not be empty".to_string()));
        }
        if self.nav_window_ms == 0 {
            return Err(AttentionError::Config(
                "nav_window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }

    /// Full URL for an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64, AttentionError> {
    value
        .trim()
        .parse()
        .map_err(|_| AttentionError::Config(format!("{}: '{}' is not a millisecond count", key, value)))
}
