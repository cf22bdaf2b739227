//! Configuration for the allow-list resolver.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Published metadata endpoint for GitHub, including the Actions ranges.
pub const GITHUB_META_URL: &str = "https://api.github.com/meta";

/// Category of the metadata document holding the runner ranges.
pub const ACTIONS_CATEGORY: &str = "actions";

/// Allow-list configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistConfig {
    /// Extra CIDR ranges appended after the remote ranges.
    #[serde(rename = "additionalCIDRs", alias = "additional_cidrs")]
    pub additional_cidrs: Vec<String>,

    /// Remote metadata source.
    pub source: SourceConfig,

    /// Shared allow-list cache.
    pub cache: CacheConfig,
}

impl AllowlistConfig {
    /// Create a config with the given additional ranges and default source.
    #[must_use]
    pub fn with_additional_cidrs<I, S>(cidrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            additional_cidrs: cidrs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Malformed entries in `additionalCIDRs` are not an error; they are
    /// skipped when the resolver is built.
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate().map_err(|e| format!("source: {e}"))?;
        self.cache.validate().map_err(|e| format!("cache: {e}"))?;
        Ok(())
    }
}

/// Remote metadata endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Metadata endpoint URL.
    pub url: String,

    /// Key of the document whose value lists the trusted CIDRs.
    pub category: String,

    /// Upper bound for one fetch, including connect and body download.
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: GITHUB_META_URL.to_string(),
            category: ACTIONS_CATEGORY.to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl SourceConfig {
    /// Source pointing at a custom endpoint with default category and timeout.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Request timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("url must be http(s), got '{}'", self.url));
        }
        if self.category.is_empty() {
            return Err("category must not be empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Share one periodically refreshed allow-list between connections.
    /// When disabled every connection fetches the list itself.
    pub enabled: bool,

    /// Interval between background refreshes.
    pub refresh_interval_secs: u64,

    /// Oldest snapshot that may still be used for admission.
    pub max_staleness_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: 300,
            max_staleness_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Per-connection fetching, no cache.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Refresh interval as a duration.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Staleness bound as a duration.
    #[must_use]
    pub fn max_staleness(&self) -> Duration {
        Duration::from_secs(self.max_staleness_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.refresh_interval_secs == 0 {
            return Err("refresh_interval_secs must be greater than 0".to_string());
        }
        if self.max_staleness_secs < self.refresh_interval_secs {
            return Err(format!(
                "max_staleness_secs ({}) must be at least refresh_interval_secs ({})",
                self.max_staleness_secs, self.refresh_interval_secs
            ));
        }
        Ok(())
    }
}
