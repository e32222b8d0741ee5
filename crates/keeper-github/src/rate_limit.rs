//! Rate limit state reported by GitHub on every response

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::fmt;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Most recent quota snapshot for an authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl RateLimit {
    /// Read the snapshot from response headers.
    ///
    /// Returns `None` unless all three headers are present and well formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };

        let reset_epoch = i64::try_from(number(RESET_HEADER)?).ok()?;

        Some(Self {
            limit: number(LIMIT_HEADER)?,
            remaining: number(REMAINING_HEADER)?,
            reset_at: Utc.timestamp_opt(reset_epoch, 0).single()?,
        })
    }

    /// Time left until the quota resets, never negative
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).max(Duration::zero())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remaining, self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(limit: &str, remaining: &str, reset: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(LIMIT_HEADER, HeaderValue::from_str(limit).unwrap());
        map.insert(REMAINING_HEADER, HeaderValue::from_str(remaining).unwrap());
        map.insert(RESET_HEADER, HeaderValue::from_str(reset).unwrap());
        map
    }

    #[test]
    fn test_parse_headers() {
        let rate_limit = RateLimit::from_headers(&headers("5000", "4987", "1372700873")).unwrap();

        assert_eq!(rate_limit.limit, 5000);
        assert_eq!(rate_limit.remaining, 4987);
        assert_eq!(rate_limit.reset_at.timestamp(), 1372700873);
        assert_eq!(rate_limit.to_string(), "4987/5000");
        assert!(!rate_limit.is_exhausted());
    }

    #[test]
    fn test_missing_or_malformed_headers() {
        assert!(RateLimit::from_headers(&HeaderMap::new()).is_none());
        assert!(RateLimit::from_headers(&headers("5000", "lots", "1372700873")).is_none());

        let mut partial = headers("5000", "10", "1372700873");
        partial.remove(RESET_HEADER);
        assert!(RateLimit::from_headers(&partial).is_none());
    }

    #[test]
    fn test_time_until_reset() {
        let rate_limit = RateLimit::from_headers(&headers("60", "0", "1000")).unwrap();

        let before = Utc.timestamp_opt(940, 0).unwrap();
        assert_eq!(rate_limit.time_until_reset(before), Duration::seconds(60));

        let after = Utc.timestamp_opt(2000, 0).unwrap();
        assert_eq!(rate_limit.time_until_reset(after), Duration::zero());
        assert!(rate_limit.is_exhausted());
    }
}
