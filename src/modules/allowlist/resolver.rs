//! Allow-list resolution: remote ranges merged with static ranges.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use super::error::AllowlistResult;
use super::list::Allowlist;
use super::range::{parse_ranges, CidrRange, RangeOrigin};
use super::source::{HttpMetaSource, MetaSource};

/// Anything that can hand out the current allow-list.
#[async_trait]
pub trait AllowlistProvider: Send + Sync {
    /// Produce the merged allow-list to evaluate a connection against.
    async fn resolve(&self) -> AllowlistResult<Arc<Allowlist>>;

    /// The statically configured ranges alone.
    fn static_ranges(&self) -> &[CidrRange];
}

/// Fetches the remote ranges on every call and appends the static ranges.
#[derive(Debug)]
pub struct AllowlistResolver<S = HttpMetaSource> {
    source: S,
    static_ranges: Vec<CidrRange>,
}

impl<S: MetaSource> AllowlistResolver<S> {
    /// Create a resolver.
    ///
    /// `additional_cidrs` are parsed once here; invalid entries are logged
    /// and left out.
    pub fn new<I, T>(source: S, additional_cidrs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            source,
            static_ranges: parse_ranges(additional_cidrs, RangeOrigin::Static),
        }
    }

    /// The underlying metadata source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the remote ranges and build a fresh allow-list.
    ///
    /// # Errors
    ///
    /// Propagates the source's request-build, network or decode error.
    /// Invalid individual entries are skipped, never returned as errors.
    pub async fn fetch(&self) -> AllowlistResult<Allowlist> {
        let entries = match self.source.fetch().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(endpoint = self.source.endpoint(), error = %e, "Failed to fetch allow-list");
                return Err(e);
            },
        };

        let remote = parse_ranges(&entries, RangeOrigin::Remote);
        debug!(
            endpoint = self.source.endpoint(),
            remote_ranges = remote.len(),
            skipped = entries.len() - remote.len(),
            static_ranges = self.static_ranges.len(),
            "Resolved allow-list"
        );

        Ok(Allowlist::merged(remote, &self.static_ranges))
    }
}

#[async_trait]
impl<S: MetaSource> AllowlistProvider for AllowlistResolver<S> {
    async fn resolve(&self) -> AllowlistResult<Arc<Allowlist>> {
        self.fetch().await.map(Arc::new)
    }

    fn static_ranges(&self) -> &[CidrRange] {
        &self.static_ranges
    }
}
