//! RTP source filtering
//!
//! Source-address allow/deny rules applied per receive session, matching
//! the SDP `a=source-filter` semantics. An empty rule set accepts any
//! source; exclude rules always win over include rules.

use std::net::IpAddr;

/// Allow/deny list for packet source addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpFilter {
    include: Vec<IpAddr>,
    exclude: Vec<IpAddr>,
}

impl RtpFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an include filter from an SDP source-filter attribute.
    pub fn including(sources: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            include: sources.into_iter().collect(),
            exclude: Vec::new(),
        }
    }

    pub fn add_include(&mut self, source: IpAddr) {
        if !self.include.contains(&source) {
            self.include.push(source);
        }
    }

    pub fn add_exclude(&mut self, source: IpAddr) {
        if !self.exclude.contains(&source) {
            self.exclude.push(source);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a packet from `source` passes the filter.
    pub fn allows(&self, source: IpAddr) -> bool {
        if self.exclude.contains(&source) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.contains(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_empty_filter_accepts_any() {
        let filter = RtpFilter::new();
        assert!(filter.allows(ip(1)));
        assert!(filter.allows(ip(200)));
    }

    #[test]
    fn test_include_list() {
        let filter = RtpFilter::including([ip(1), ip(2)]);
        assert!(filter.allows(ip(1)));
        assert!(filter.allows(ip(2)));
        assert!(!filter.allows(ip(3)));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let mut filter = RtpFilter::including([ip(1)]);
        filter.add_exclude(ip(1));
        assert!(!filter.allows(ip(1)));
    }

    #[test]
    fn test_exclude_only() {
        let mut filter = RtpFilter::new();
        filter.add_exclude(ip(9));
        assert!(!filter.allows(ip(9)));
        assert!(filter.allows(ip(8)));
    }
}
