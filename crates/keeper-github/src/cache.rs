//! Process-wide cache shared by every installation client
//!
//! Holds two kinds of entries side by side: installation access tokens and
//! the validators of earlier GET responses. Keys are namespaced by
//! installation id so one installation never sees another's entries.

use crate::InstallationToken;
use keeper_core::LruCache;
use std::sync::Arc;

/// Cache handle cloned into every client
pub type SharedCache = Arc<LruCache<String, CacheValue>>;

/// Build an empty shared cache bounded to `capacity` entries
pub fn shared_cache(capacity: usize) -> SharedCache {
    Arc::new(LruCache::new(capacity))
}

#[derive(Debug, Clone)]
pub enum CacheValue {
    Token(InstallationToken),
    Response(CachedResponse),
}

/// A GET response kept for conditional revalidation
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Arc<[u8]>,
}

impl CachedResponse {
    /// Only responses carrying a validator are worth keeping.
    pub fn is_revalidatable(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

pub fn token_key(installation_id: u64) -> String {
    format!("installation:{}:token", installation_id)
}

pub fn response_key(installation_id: u64, url: &str) -> String {
    format!("installation:{}:GET {}", installation_id, url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use secrecy::Secret;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(token_key(7), "installation:7:token");
        assert_ne!(token_key(7), token_key(8));
        assert_eq!(
            response_key(7, "https://api.github.com/repos/a/b"),
            "installation:7:GET https://api.github.com/repos/a/b"
        );
    }

    #[test]
    fn test_mixed_entries() {
        let cache = shared_cache(2);
        cache.put(
            token_key(1),
            CacheValue::Token(InstallationToken {
                token: Secret::new("ghs_one".into()),
                expires_at: Utc::now() + Duration::hours(1),
            }),
        );
        cache.put(
            response_key(1, "/x"),
            CacheValue::Response(CachedResponse {
                etag: Some("\"abc\"".into()),
                last_modified: None,
                body: Arc::from(&b"{}"[..]),
            }),
        );
        cache.put(token_key(2), CacheValue::Token(InstallationToken {
            token: Secret::new("ghs_two".into()),
            expires_at: Utc::now() + Duration::hours(1),
        }));

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&token_key(1)));
        assert!(matches!(
            cache.get(&response_key(1, "/x")),
            Some(CacheValue::Response(r)) if r.is_revalidatable()
        ));
    }
}
