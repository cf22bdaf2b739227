//! # Allow-list Module
//!
//! Resolves the set of CIDR ranges a peer must fall into to be admitted:
//! the ranges GitHub publishes for Actions runners (the `actions` category
//! of `https://api.github.com/meta`) followed by the operator's
//! `additionalCIDRs`.
//!
//! ## Features
//!
//! - **Skip-on-invalid**: malformed CIDR entries are logged and ignored
//! - **IPv4 and IPv6**: host bits may be set, IPv4-mapped peers match IPv4 ranges
//! - **Bounded fetches**: every request carries a timeout
//! - **Shared cache**: one background refresh, last-known-good with a staleness bound
//!
//! ## Configuration
//!
//! ```toml
//! additionalCIDRs = ["10.0.0.0/8"]
//!
//! [source]
//! url = "https://api.github.com/meta"
//! category = "actions"
//! request_timeout_secs = 10
//!
//! [cache]
//! enabled = true
//! refresh_interval_secs = 300
//! max_staleness_secs = 3600
//! ```

mod cache;
mod config;
mod error;
mod list;
mod range;
mod resolver;
mod source;

pub use cache::{CacheStats, CachedAllowlist, RefreshHandle};
pub use config::{AllowlistConfig, CacheConfig, SourceConfig, ACTIONS_CATEGORY, GITHUB_META_URL};
pub use error::{AllowlistError, AllowlistResult, FetchErrorKind};
pub use list::Allowlist;
pub use range::{parse_ranges, CidrRange, RangeOrigin};
pub use resolver::{AllowlistProvider, AllowlistResolver};
pub use source::{FixedMetaSource, HttpMetaSource, MetaDocument, MetaSource};
