//! Remote actor resolution backed by the `actor_cache` table.
//!
//! A cached profile younger than the freshness window is served without any
//! network call.  Otherwise the actor is fetched again (bounded by a
//! timeout) and the row refreshed in place; if that fetch fails, the stale
//! row is served rather than failing.  Concurrent misses for the same actor
//! may each fetch; the store keeps one row per actor regardless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use heraut_shared::constants::{ACTOR_CACHE_FRESHNESS_SECS, DEFAULT_NETWORK_TIMEOUT_SECS};
use heraut_shared::Attributes;
use heraut_store::{CachedActor, SharedDatabase};

use crate::db::with_db;
use crate::error::{FederationError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorProfile {
    /// Canonical account handle, e.g. `bob@remote.example`.
    pub account: String,
    /// Canonical actor URL.
    pub url: String,
    pub attributes: Attributes,
}

impl From<CachedActor> for ActorProfile {
    fn from(row: CachedActor) -> Self {
        Self {
            account: row.account,
            url: row.url,
            attributes: row.profile,
        }
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Actor not found")]
    NotFound,

    #[error("Remote answered HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid actor document: {0}")]
    InvalidDocument(String),
}

/// Fetches an actor profile from its home server.
#[async_trait]
pub trait ActorFetcher: Send + Sync {
    /// `identifier` is an actor URL or a `user@host` handle.
    async fn fetch_actor(&self, identifier: &str) -> std::result::Result<ActorProfile, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ActorCacheConfig {
    pub freshness: Duration,
    pub fetch_timeout: Duration,
}

impl Default for ActorCacheConfig {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(ACTOR_CACHE_FRESHNESS_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }
}

pub struct ActorCache {
    db: SharedDatabase,
    fetcher: Arc<dyn ActorFetcher>,
    config: ActorCacheConfig,
}

impl ActorCache {
    pub fn new(
        db: SharedDatabase,
        fetcher: Arc<dyn ActorFetcher>,
        config: ActorCacheConfig,
    ) -> Self {
        Self { db, fetcher, config }
    }

    pub fn config(&self) -> &ActorCacheConfig {
        &self.config
    }

    /// Resolve an actor by URL or handle (`@bob@remote.example` or
    /// `bob@remote.example`).
    pub async fn resolve(&self, identifier: &str) -> Result<ActorProfile> {
        self.resolve_at(identifier, Utc::now().timestamp()).await
    }

    /// [`Self::resolve`] with an explicit clock, in unix seconds.
    pub async fn resolve_at(&self, identifier: &str, now: i64) -> Result<ActorProfile> {
        let key = normalize_identifier(identifier)?;
        let cached = with_db(&self.db, |db| db.find_cached_actor(&key))?;

        if let Some(row) = &cached {
            if !self.is_stale(row, now) {
                debug!(actor = %key, age = now - row.created_at, "Actor served from cache");
                return Ok(row.clone().into());
            }
        }

        match self.fetch(&key).await {
            Ok(profile) => {
                let ActorProfile {
                    account,
                    url,
                    attributes,
                } = profile;
                let row = with_db(&self.db, |db| {
                    db.upsert_cached_actor(&account, &url, &attributes, now)
                })?;
                info!(
                    actor = %row.account,
                    url = %row.url,
                    refreshed = cached.is_some(),
                    "Actor fetched"
                );
                Ok(row.into())
            }
            Err(e) => match cached {
                Some(row) => {
                    warn!(actor = %key, error = %e, "Refresh failed; serving stale actor");
                    Ok(row.into())
                }
                None => Err(FederationError::ActorUnresolvable {
                    identifier: key,
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Forget a cached actor so the next resolve fetches it.
    pub fn invalidate(&self, identifier: &str) -> Result<bool> {
        let key = normalize_identifier(identifier)?;
        with_db(&self.db, |db| db.remove_cached_actor(&key))
    }

    fn is_stale(&self, row: &CachedActor, now: i64) -> bool {
        let freshness = i64::try_from(self.config.freshness.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(row.created_at) >= freshness
    }

    async fn fetch(&self, key: &str) -> Result<ActorProfile> {
        let profile = tokio::time::timeout(self.config.fetch_timeout, self.fetcher.fetch_actor(key))
            .await
            .map_err(|_| FederationError::Timeout(self.config.fetch_timeout))?
            .map_err(|e| FederationError::Transport(e.to_string()))?;

        if profile.account.trim().is_empty() || profile.url.trim().is_empty() {
            return Err(FederationError::Transport(format!(
                "actor document for {key} lacks an account or URL"
            )));
        }
        Ok(profile)
    }
}

/// Cache key of an identifier: the URL as-is, or the handle without its
/// leading `@`.
pub fn normalize_identifier(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();
    let key = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed
    } else {
        trimmed.trim_start_matches('@')
    };
    if key.is_empty() {
        return Err(FederationError::InvalidItem(
            "empty actor identifier".to_string(),
        ));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use heraut_store::Database;
    use serde_json::json;

    use super::*;

    const BOB_URL: &str = "https://remote.example/users/bob";
    const DAY: i64 = 24 * 60 * 60;

    enum Mode {
        Ok(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedFetcher {
        mode: Mutex<Mode>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode: Mutex::new(mode),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActorFetcher for ScriptedFetcher {
        async fn fetch_actor(
            &self,
            _identifier: &str,
        ) -> std::result::Result<ActorProfile, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let name = match &*self.mode.lock().unwrap() {
                Mode::Ok(name) => *name,
                Mode::Fail => return Err(FetchError::Status(503)),
                Mode::Hang => "",
            };
            if name.is_empty() {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ActorProfile {
                account: "bob@remote.example".to_string(),
                url: BOB_URL.to_string(),
                attributes: json!({"name": name}).as_object().unwrap().clone(),
            })
        }
    }

    fn cache(fetcher: Arc<ScriptedFetcher>) -> (ActorCache, SharedDatabase) {
        let db = Database::open_in_memory().unwrap().into_shared();
        let config = ActorCacheConfig {
            freshness: Duration::from_secs(DAY as u64),
            fetch_timeout: Duration::from_millis(50),
        };
        (ActorCache::new(db.clone(), fetcher, config), db)
    }

    #[tokio::test]
    async fn test_fresh_entry_skips_network() {
        let fetcher = ScriptedFetcher::new(Mode::Ok("Bob"));
        let (cache, _db) = cache(fetcher.clone());

        let first = cache.resolve_at(BOB_URL, 1_000).await.unwrap();
        let second = cache.resolve_at("@bob@remote.example", 1_000 + DAY - 1).await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(second.attributes["name"], "Bob");
    }

    #[tokio::test]
    async fn test_concurrent_misses_converge_on_one_row() {
        let fetcher = ScriptedFetcher::new(Mode::Ok("Bob"));
        let (cache, db) = cache(fetcher.clone());

        let lookups = (0..8).map(|i| {
            let identifier = if i % 2 == 0 { BOB_URL } else { "@bob@remote.example" };
            cache.resolve_at(identifier, 1_000)
        });
        let profiles = futures::future::join_all(lookups).await;

        // Every lookup missed before any of them stored the row.
        assert_eq!(fetcher.calls(), 8);
        for profile in profiles {
            let profile = profile.unwrap();
            assert_eq!(profile.url, BOB_URL);
            assert_eq!(profile.account, "bob@remote.example");
        }
        assert_eq!(db.lock().unwrap().count_cached_actors().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refreshed_in_place() {
        let fetcher = ScriptedFetcher::new(Mode::Ok("Bob"));
        let (cache, db) = cache(fetcher.clone());
        cache.resolve_at(BOB_URL, 0).await.unwrap();

        fetcher.set(Mode::Ok("Robert"));
        let refreshed = cache.resolve_at(BOB_URL, 2 * DAY).await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(refreshed.attributes["name"], "Robert");
        let guard = db.lock().unwrap();
        assert_eq!(guard.count_cached_actors().unwrap(), 1);
        assert_eq!(guard.find_cached_actor(BOB_URL).unwrap().unwrap().created_at, 2 * DAY);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_row() {
        let fetcher = ScriptedFetcher::new(Mode::Ok("Bob"));
        let (cache, db) = cache(fetcher.clone());
        cache.resolve_at(BOB_URL, 0).await.unwrap();

        fetcher.set(Mode::Fail);
        let stale = cache.resolve_at(BOB_URL, 3 * DAY).await.unwrap();

        assert_eq!(stale.attributes["name"], "Bob");
        let row = db.lock().unwrap().find_cached_actor(BOB_URL).unwrap().unwrap();
        assert_eq!(row.created_at, 0);
    }

    #[tokio::test]
    async fn test_unknown_actor_failure_is_unresolvable() {
        let fetcher = ScriptedFetcher::new(Mode::Fail);
        let (cache, _db) = cache(fetcher);
        assert!(matches!(
            cache.resolve(BOB_URL).await,
            Err(FederationError::ActorUnresolvable { .. })
        ));
    }

    #[tokio::test]
    async fn test_hanging_fetch_times_out() {
        let fetcher = ScriptedFetcher::new(Mode::Hang);
        let (cache, _db) = cache(fetcher);
        let err = cache.fetch(BOB_URL).await.unwrap_err();
        assert!(matches!(err, FederationError::Timeout(_)));
        assert!(err.is_retryable());

        assert!(matches!(
            cache.resolve(BOB_URL).await,
            Err(FederationError::ActorUnresolvable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let fetcher = ScriptedFetcher::new(Mode::Ok("Bob"));
        let (cache, _db) = cache(fetcher.clone());
        cache.resolve_at(BOB_URL, 10).await.unwrap();
        assert!(cache.invalidate("bob@remote.example").unwrap());
        cache.resolve_at(BOB_URL, 11).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier(" @bob@remote.example ").unwrap(), "bob@remote.example");
        assert_eq!(normalize_identifier(BOB_URL).unwrap(), BOB_URL);
        assert!(normalize_identifier("@").is_err());
    }
}
