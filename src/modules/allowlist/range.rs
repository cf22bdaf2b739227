//! CIDR ranges and their parsing policy.

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use tracing::warn;

use super::error::{AllowlistError, AllowlistResult};

/// Where a range in the allow-list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeOrigin {
    /// Published by the metadata endpoint.
    Remote,
    /// Listed in `additionalCIDRs`.
    Static,
}

impl fmt::Display for RangeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// A single IP network in the allow-list.
///
/// Host bits may be set (`10.1.2.3/8` is accepted and covers all of
/// `10.0.0.0/8`); the prefix length is mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    net: IpNet,
    origin: RangeOrigin,
}

impl CidrRange {
    /// Parse one CIDR entry.
    ///
    /// # Errors
    ///
    /// Returns [`AllowlistError::InvalidRange`] if `entry` is not an IPv4
    /// or IPv6 network with a prefix length.
    pub fn parse(entry: &str, origin: RangeOrigin) -> AllowlistResult<Self> {
        entry
            .parse::<IpNet>()
            .map(|net| Self { net, origin })
            .map_err(|e| AllowlistError::InvalidRange {
                cidr: entry.to_string(),
                message: e.to_string(),
            })
    }

    /// The parsed network.
    #[must_use]
    pub fn network(&self) -> IpNet {
        self.net
    }

    /// Where this range came from.
    #[must_use]
    pub fn origin(&self) -> RangeOrigin {
        self.origin
    }

    /// Check whether `ip` falls inside this range.
    ///
    /// IPv4-mapped IPv6 addresses are matched as their IPv4 form.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.net.contains(&ip.to_canonical())
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// Parse a sequence of CIDR entries, skipping invalid ones.
///
/// Every skipped entry is reported at warn level; order of the valid
/// entries is preserved.
pub fn parse_ranges<I, S>(entries: I, origin: RangeOrigin) -> Vec<CidrRange>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .filter_map(|entry| match CidrRange::parse(entry.as_ref(), origin) {
            Ok(range) => Some(range),
            Err(e) => {
                warn!(cidr = entry.as_ref(), %origin, error = %e, "Skipping CIDR");
                None
            },
        })
        .collect()
}
