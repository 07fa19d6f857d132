use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use updraft_host::{HostError, KeyValueStore};

use crate::clock::Clock;
use crate::registry::ReleaseMetadata;

pub const LATEST_RELEASE_KEY: &str = "latest-release-response";
pub const LAST_CHECK_KEY: &str = "last-update-check";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: ReleaseMetadata,
    pub fetched_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    /// Seconds elapsed since the entry was fetched; never negative.
    #[must_use]
    pub fn age_secs_at(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.fetched_at).num_seconds()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.age_secs_at(now) > self.ttl_seconds
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidate<'a> {
    Key(&'a str),
    /// Every cached response plus the last-check timestamp.
    All,
}

/// TTL cache of registry responses on top of a host key-value store.
///
/// Also owns the single-flight refresh lock: whoever holds
/// [`ReleaseCache::lock_refresh`] is the only caller allowed to hit the
/// registry for the cached key.
pub struct ReleaseCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    refresh: Mutex<()>,
}

impl ReleaseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            default_ttl,
            refresh: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Present entries are returned whether or not they are stale.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.store.get(key)?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                debug!("Discarding unreadable cache entry {key}: {error}");
                None
            }
        }
    }

    #[must_use]
    pub fn get_latest(&self) -> Option<CacheEntry> {
        self.get(LATEST_RELEASE_KEY)
    }

    #[must_use]
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        !entry.is_stale_at(self.clock.now())
    }

    /// # Errors
    /// Returns an error when the entry cannot be serialized or persisted.
    pub fn set(
        &self,
        key: &str,
        value: ReleaseMetadata,
        ttl: Duration,
    ) -> Result<CacheEntry, HostError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            fetched_at: self.clock.now(),
            ttl_seconds: ttl.as_secs(),
        };
        let raw = serde_json::to_string(&entry).map_err(|e| HostError::store("release cache", e))?;
        self.store.set(key, &raw)?;
        debug!("Cached {key} ({}) for {}s", entry.value.version, entry.ttl_seconds);
        Ok(entry)
    }

    /// # Errors
    /// Returns an error when the entry cannot be persisted.
    pub fn set_latest(&self, value: ReleaseMetadata) -> Result<CacheEntry, HostError> {
        self.set(LATEST_RELEASE_KEY, value, self.default_ttl)
    }

    /// # Errors
    /// Returns an error when a key cannot be removed from the store.
    pub fn invalidate(&self, scope: Invalidate<'_>) -> Result<(), HostError> {
        match scope {
            Invalidate::Key(key) => self.store.remove(key),
            Invalidate::All => {
                self.store.remove(LATEST_RELEASE_KEY)?;
                self.store.remove(LAST_CHECK_KEY)?;
                debug!("Release cache cleared");
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(LAST_CHECK_KEY)?;
        DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }

    /// # Errors
    /// Returns an error when the timestamp cannot be persisted.
    pub fn mark_checked(&self) -> Result<DateTime<Utc>, HostError> {
        let now = self.clock.now();
        self.store.set(LAST_CHECK_KEY, &now.to_rfc3339())?;
        Ok(now)
    }

    /// Wait for the refresh lock.
    pub async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh.lock().await
    }

    /// Take the refresh lock only if no refresh is in flight.
    #[must_use]
    pub fn try_lock_refresh(&self) -> Option<MutexGuard<'_, ()>> {
        self.refresh.try_lock().ok()
    }
}
