//! Time-limited caches backing the legacy frontend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use moka::future::Cache;

/// (organisation, repository) key addressing one upstream repository.
pub type RepoKey = (String, String);

const ADVERTISEMENT_TTL: Duration = Duration::from_secs(5 * 60);
const ADVERTISEMENT_CAPACITY: u64 = 32;
const REFS_TTL: Duration = Duration::from_secs(10 * 60);
const REFS_CAPACITY: u64 = 1024;

/// Both caches are filled together on a `/info/refs` miss: the synthesised
/// advertisement bytes, and the objid→refname map the follow-up POST uses to
/// turn `want` lines back into fetchable ref names.
#[derive(Clone)]
pub struct LegacyCaches {
    pub advertisements: Cache<RepoKey, Bytes>,
    pub refs: Cache<RepoKey, Arc<HashMap<String, String>>>,
}

impl LegacyCaches {
    pub fn new() -> Self {
        LegacyCaches {
            advertisements: Cache::builder()
                .max_capacity(ADVERTISEMENT_CAPACITY)
                .time_to_live(ADVERTISEMENT_TTL)
                .build(),
            refs: Cache::builder()
                .max_capacity(REFS_CAPACITY)
                .time_to_live(REFS_TTL)
                .build(),
        }
    }
}

impl Default for LegacyCaches {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_round_trip() {
        let caches = LegacyCaches::new();
        let key = ("octocat".to_string(), "hello".to_string());

        caches
            .advertisements
            .insert(key.clone(), Bytes::from_static(b"0000"))
            .await;
        caches
            .refs
            .insert(
                key.clone(),
                Arc::new(HashMap::from([("a".repeat(40), "refs/heads/main".to_string())])),
            )
            .await;

        assert_eq!(
            caches.advertisements.get(&key).await,
            Some(Bytes::from_static(b"0000"))
        );
        let map = caches.refs.get(&key).await.unwrap();
        assert_eq!(map.get(&"a".repeat(40)).unwrap(), "refs/heads/main");
    }

    #[tokio::test]
    async fn misses_are_none() {
        let caches = LegacyCaches::new();
        let key = ("no".to_string(), "such".to_string());
        assert!(caches.advertisements.get(&key).await.is_none());
        assert!(caches.refs.get(&key).await.is_none());
    }
}
