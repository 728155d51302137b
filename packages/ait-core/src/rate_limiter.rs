//! Per-IP usage tracking and daily rate limiting.
//!
//! Each accepted request records a `(timestamp, weight)` sample under the
//! caller's IP. `exceeded` sums the weights still inside the trailing
//! 24-hour window and compares against the configured daily budget.
//! Samples are expired lazily on the next write for that IP rather than
//! swept on a timer, so an IP that never returns leaves behind at most
//! one stale deque until the reaper's session sweep has nothing to do
//! with it anyway — this cache is unbounded per distinct IP by design,
//! matching the host system's in-memory storage.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::protocol_constants::RATE_LIMIT_WINDOW;
use crate::session::now_secs;

struct UsageEntry {
    timestamp: f64,
    weight: f64,
}

/// Tracks resource-usage weight per IP address over a trailing window.
pub struct RateLimiter {
    storage: DashMap<String, VecDeque<UsageEntry>>,
    per_day_limit: f64,
}

impl RateLimiter {
    pub fn new(per_day_limit: f64) -> Self {
        Self {
            storage: DashMap::new(),
            per_day_limit,
        }
    }

    fn clean_old_entries(entries: &mut VecDeque<UsageEntry>, now: f64) {
        let window = RATE_LIMIT_WINDOW.as_secs_f64();
        while entries.front().is_some_and(|e| now - e.timestamp > window) {
            entries.pop_front();
        }
    }

    /// Sums usage weight in the window, not including eviction — reads
    /// tolerate momentarily stale (slightly high) totals; cleanup happens
    /// on the next `increment` for that IP.
    fn total_weight(&self, ip_address: &str, now: f64) -> f64 {
        let window = RATE_LIMIT_WINDOW.as_secs_f64();
        match self.storage.get(ip_address) {
            Some(entries) => entries
                .iter()
                .filter(|e| now - e.timestamp <= window)
                .map(|e| e.weight)
                .sum(),
            None => 0.0,
        }
    }

    /// Records `weight` units of usage for `ip_address` at the current time.
    pub fn increment(&self, ip_address: &str, weight: f64) {
        let now = now_secs();
        let mut entries = self.storage.entry(ip_address.to_string()).or_default();
        entries.push_back(UsageEntry { timestamp: now, weight });
        Self::clean_old_entries(&mut entries, now);
    }

    /// Returns whether `ip_address` has exceeded its configured daily budget.
    pub fn exceeded(&self, ip_address: &str) -> bool {
        let now = now_secs();
        self.total_weight(ip_address, now) > self.per_day_limit
    }
}

/// Source of the caller IP used for rate limiting: either the transport
/// peer address, or the `X-Forwarded-For` header when the deployment sits
/// behind a trusted reverse proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSource {
    PeerAddress,
    XForwardedFor,
}

/// Resolves the IP address to rate-limit against, per the configured policy.
///
/// Returns `None` when the configured source yields nothing — a missing
/// `X-Forwarded-For` header behind a proxy, or a connection with no peer
/// address — which callers should treat as a validation failure rather
/// than silently skip rate limiting.
pub fn resolve_ip_address(
    source: IpSource,
    peer_address: Option<&str>,
    x_forwarded_for: Option<&str>,
) -> Option<String> {
    match source {
        IpSource::XForwardedFor => x_forwarded_for.map(|s| s.to_string()),
        IpSource::PeerAddress => peer_address.map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_not_exceeded() {
        let limiter = RateLimiter::new(100.0);
        limiter.increment("1.2.3.4", 10.0);
        limiter.increment("1.2.3.4", 20.0);
        assert!(!limiter.exceeded("1.2.3.4"));
    }

    #[test]
    fn over_limit_is_exceeded() {
        let limiter = RateLimiter::new(100.0);
        limiter.increment("1.2.3.4", 60.0);
        limiter.increment("1.2.3.4", 60.0);
        assert!(limiter.exceeded("1.2.3.4"));
    }

    #[test]
    fn distinct_ips_tracked_independently() {
        let limiter = RateLimiter::new(50.0);
        limiter.increment("1.2.3.4", 100.0);
        assert!(limiter.exceeded("1.2.3.4"));
        assert!(!limiter.exceeded("5.6.7.8"));
    }

    #[test]
    fn resolve_ip_prefers_configured_source() {
        assert_eq!(
            resolve_ip_address(IpSource::XForwardedFor, Some("10.0.0.1"), Some("203.0.113.9")),
            Some("203.0.113.9".to_string())
        );
        assert_eq!(
            resolve_ip_address(IpSource::PeerAddress, Some("10.0.0.1"), Some("203.0.113.9")),
            Some("10.0.0.1".to_string())
        );
    }

    #[test]
    fn resolve_ip_missing_forwarded_header_yields_none() {
        assert_eq!(resolve_ip_address(IpSource::XForwardedFor, Some("10.0.0.1"), None), None);
    }
}
