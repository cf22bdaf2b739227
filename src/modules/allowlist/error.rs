//! Allow-list resolver error types.

use thiserror::Error;

/// Errors produced while obtaining or parsing the allow-list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllowlistError {
    /// The outbound metadata request could not be constructed.
    #[error("failed to build request to {url}: {message}")]
    RequestBuild {
        /// Metadata endpoint.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// The metadata endpoint could not be reached, timed out or answered
    /// with a non-success status.
    #[error("failed to fetch {url}: {message}")]
    Network {
        /// Metadata endpoint.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// Metadata endpoint.
        url: String,
        /// Underlying error message.
        message: String,
    },

    /// A single CIDR entry failed to parse. Never fatal on its own.
    #[error("invalid CIDR '{cidr}': {message}")]
    InvalidRange {
        /// The offending entry.
        cidr: String,
        /// Parser message.
        message: String,
    },

    /// The cached allow-list is older than the staleness bound and could
    /// not be refreshed.
    #[error("cached allow-list is stale ({age_secs}s old, limit {max_staleness_secs}s)")]
    Stale {
        /// Age of the last good snapshot.
        age_secs: u64,
        /// Configured staleness bound.
        max_staleness_secs: u64,
    },
}

/// Coarse classification of [`AllowlistError`] used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// See [`AllowlistError::RequestBuild`].
    RequestBuild,
    /// See [`AllowlistError::Network`].
    Network,
    /// See [`AllowlistError::Decode`].
    Decode,
    /// See [`AllowlistError::InvalidRange`].
    InvalidRange,
    /// See [`AllowlistError::Stale`].
    Stale,
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestBuild => write!(f, "request_build"),
            Self::Network => write!(f, "network"),
            Self::Decode => write!(f, "decode"),
            Self::InvalidRange => write!(f, "invalid_range"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

impl AllowlistError {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::RequestBuild { .. } => FetchErrorKind::RequestBuild,
            Self::Network { .. } => FetchErrorKind::Network,
            Self::Decode { .. } => FetchErrorKind::Decode,
            Self::InvalidRange { .. } => FetchErrorKind::InvalidRange,
            Self::Stale { .. } => FetchErrorKind::Stale,
        }
    }

    /// Whether a later attempt might succeed without operator action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Stale { .. })
    }
}

/// Result type for allow-list operations.
pub type AllowlistResult<T> = Result<T, AllowlistError>;
