//! The merged allow-list evaluated for each connection.

use std::net::IpAddr;

use super::range::{CidrRange, RangeOrigin};

/// Ordered set of ranges: remote ranges first, then static ranges.
///
/// Membership does not depend on order; order only decides which range is
/// reported as the match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    ranges: Vec<CidrRange>,
}

impl Allowlist {
    /// Create an empty allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allow-list from already parsed ranges.
    #[must_use]
    pub fn from_ranges(ranges: Vec<CidrRange>) -> Self {
        Self { ranges }
    }

    /// Concatenate remote ranges with the static ranges.
    #[must_use]
    pub fn merged(mut remote: Vec<CidrRange>, static_ranges: &[CidrRange]) -> Self {
        remote.extend_from_slice(static_ranges);
        Self { ranges: remote }
    }

    /// Return the first range containing `ip`.
    #[must_use]
    pub fn find_match(&self, ip: IpAddr) -> Option<&CidrRange> {
        self.ranges.iter().find(|range| range.contains(ip))
    }

    /// Check whether any range contains `ip`.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.find_match(ip).is_some()
    }

    /// Number of ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether the allow-list has no ranges at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of ranges from a given origin.
    #[must_use]
    pub fn count_origin(&self, origin: RangeOrigin) -> usize {
        self.ranges.iter().filter(|r| r.origin() == origin).count()
    }

    /// Iterate over the ranges in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &CidrRange> {
        self.ranges.iter()
    }
}

impl FromIterator<CidrRange> for Allowlist {
    fn from_iter<T: IntoIterator<Item = CidrRange>>(iter: T) -> Self {
        Self {
            ranges: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::allowlist::range::parse_ranges;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_merged_order_is_remote_then_static() {
        let remote = parse_ranges(["192.30.252.0/22", "185.199.108.0/22"], RangeOrigin::Remote);
        let statics = parse_ranges(["10.0.0.0/8"], RangeOrigin::Static);
        let list = Allowlist::merged(remote, &statics);

        let origins: Vec<RangeOrigin> = list.iter().map(CidrRange::origin).collect();
        assert_eq!(
            origins,
            vec![RangeOrigin::Remote, RangeOrigin::Remote, RangeOrigin::Static]
        );
        assert_eq!(list.count_origin(RangeOrigin::Remote), 2);
        assert_eq!(list.count_origin(RangeOrigin::Static), 1);
    }

    #[test]
    fn test_find_match_returns_first_containing_range() {
        let remote = parse_ranges(["10.0.0.0/8"], RangeOrigin::Remote);
        let statics = parse_ranges(["10.1.0.0/16"], RangeOrigin::Static);
        let list = Allowlist::merged(remote, &statics);

        let found = list.find_match(ip("10.1.2.3")).unwrap();
        assert_eq!(found.origin(), RangeOrigin::Remote);

        assert!(list.find_match(ip("8.8.8.8")).is_none());
    }

    #[test]
    fn test_membership_is_order_independent() {
        let a = parse_ranges(["192.30.252.0/22"], RangeOrigin::Remote);
        let b = parse_ranges(["10.0.0.0/8", "2001:db8::/32"], RangeOrigin::Static);

        let forward = Allowlist::merged(a.clone(), &b);
        let reverse: Allowlist = b.iter().chain(a.iter()).cloned().collect();

        for addr in ["192.30.252.5", "10.9.9.9", "2001:db8::7", "8.8.8.8", "::1"] {
            assert_eq!(forward.contains(ip(addr)), reverse.contains(ip(addr)), "{addr}");
        }
    }

    #[test]
    fn test_empty_allowlist_matches_nothing() {
        let list = Allowlist::new();
        assert!(list.is_empty());
        assert!(!list.contains(ip("127.0.0.1")));
    }
}
