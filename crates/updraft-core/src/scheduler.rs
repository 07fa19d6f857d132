use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use updraft_host::PackageHost;

use crate::identity::IdentityReconciler;
use crate::registry::{FetchError, RateLimit, ReleaseMetadata, ReleaseSource, RepoTarget};
use crate::release_cache::{CacheEntry, Invalidate, ReleaseCache};
use crate::version::is_newer_version;

/// Where the release behind a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// A fresh cache entry; no network call.
    Cache,
    /// This check fetched from the registry.
    Network,
    /// A stale entry, served because a refresh was already in flight or the
    /// refresh failed.
    StaleCache,
    /// Another check fetched within the debounce window.
    Coalesced,
}

/// Why a check could not reach a fresh answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDiagnostic {
    /// One of `network`, `not_found`, `unauthorized`, `rate_limited`,
    /// `api_error`, `malformed`.
    pub reason: String,
    pub status: Option<u16>,
    pub rate_limit: Option<RateLimit>,
    pub message: String,
}

impl From<&FetchError> for CheckDiagnostic {
    fn from(error: &FetchError) -> Self {
        Self {
            reason: error.reason().to_string(),
            status: error.status(),
            rate_limit: error.rate_limit(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDecision {
    pub current_version: String,
    /// `None` when no release has ever been fetched successfully. Hosts must
    /// render that as "unknown", not "up to date".
    pub latest_version: Option<String>,
    pub update_available: bool,
    /// Set only when an update is available.
    pub package_url: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub source: DecisionSource,
    pub diagnostic: Option<CheckDiagnostic>,
}

/// Decides whether a newer release exists, going to the registry only when
/// the cache cannot answer.
pub struct UpdateScheduler {
    source: Arc<dyn ReleaseSource>,
    cache: Arc<ReleaseCache>,
    reconciler: Arc<IdentityReconciler>,
    host: Arc<dyn PackageHost>,
    target: RepoTarget,
    debounce: Duration,
    last_decision: Mutex<Option<UpdateDecision>>,
}

impl UpdateScheduler {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        cache: Arc<ReleaseCache>,
        reconciler: Arc<IdentityReconciler>,
        host: Arc<dyn PackageHost>,
        target: RepoTarget,
        debounce: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            reconciler,
            host,
            target,
            debounce,
            last_decision: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn target(&self) -> &RepoTarget {
        &self.target
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ReleaseCache> {
        &self.cache
    }

    /// Resolve the current update decision.
    ///
    /// Without `force`, a fresh cache entry answers directly and a stale
    /// one is returned as-is while another refresh is in flight. With
    /// `force`, the cache is invalidated and the registry asked, unless a
    /// fetch landed within the debounce window. Never fails: registry
    /// errors are attached as [`CheckDiagnostic`].
    pub async fn check_now(&self, force: bool) -> UpdateDecision {
        let current = self.host.installed_version();

        if !force && let Some(entry) = self.cache.get_latest() {
            if self.cache.is_fresh(&entry) {
                debug!("Release cache hit ({})", entry.value.version);
                return self.remember(self.decide(
                    current,
                    Some(&entry.value),
                    DecisionSource::Cache,
                    None,
                ));
            }
            let Some(guard) = self.cache.try_lock_refresh() else {
                debug!("Refresh already in flight, serving stale release");
                return self.remember(self.decide(
                    current,
                    Some(&entry.value),
                    DecisionSource::StaleCache,
                    None,
                ));
            };
            return self.refresh(guard, current, force).await;
        }

        let guard = self.cache.lock_refresh().await;
        self.refresh(guard, current, force).await
    }

    /// Answer from the cache alone, stale or not. No network access.
    #[must_use]
    pub fn is_update_available(&self) -> bool {
        let current = self.host.installed_version();
        self.cache
            .get_latest()
            .is_some_and(|entry| is_newer_version(entry.value.normalized_version(), &current))
    }

    #[must_use]
    pub fn last_decision(&self) -> Option<UpdateDecision> {
        self.last_decision
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn forget_last_decision(&self) {
        *self
            .last_decision
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    async fn refresh(
        &self,
        _guard: MutexGuard<'_, ()>,
        current: String,
        force: bool,
    ) -> UpdateDecision {
        let previous = self.cache.get_latest();

        if let Some(entry) = &previous
            && self.coalesces(entry, force)
        {
            debug!("Coalescing check with fetch from {}", entry.fetched_at);
            return self.remember(self.decide(
                current,
                Some(&entry.value),
                DecisionSource::Coalesced,
                None,
            ));
        }

        match self.source.fetch_latest(&self.target).await {
            Ok(fetched) => {
                // A failed forced fetch must keep serving the last known release.
                if force && let Err(error) = self.cache.invalidate(Invalidate::All) {
                    warn!("Failed to invalidate release cache: {error}");
                }
                if let Err(error) = self.cache.set_latest(fetched.release.clone()) {
                    warn!("Failed to cache release {}: {error}", fetched.release.version);
                }
                if let Err(error) = self.cache.mark_checked() {
                    warn!("Failed to record check time: {error}");
                }
                if let Err(error) = self.reconciler.reconcile(&current) {
                    warn!("Failed to reconcile installed identity: {error}");
                }

                let decision =
                    self.decide(current, Some(&fetched.release), DecisionSource::Network, None);
                if decision.update_available {
                    info!(
                        "Update available: {} -> {}",
                        decision.current_version,
                        fetched.release.normalized_version()
                    );
                }
                self.remember(decision)
            }
            Err(error) => {
                warn!(
                    "Release check for {}/{} failed ({}): {error}",
                    self.target.owner,
                    self.target.repo,
                    error.reason()
                );
                if let Some(rate_limit) = error.rate_limit() {
                    warn!(
                        "Rate limit: remaining={:?} limit={:?} reset={:?}",
                        rate_limit.remaining, rate_limit.limit, rate_limit.reset_at
                    );
                }
                let diagnostic = Some(CheckDiagnostic::from(&error));
                let fallback = previous.as_ref().map(|entry| &entry.value);
                let source = if fallback.is_some() {
                    DecisionSource::StaleCache
                } else {
                    DecisionSource::Network
                };
                self.remember(self.decide(current, fallback, source, diagnostic))
            }
        }
    }

    fn coalesces(&self, entry: &CacheEntry, force: bool) -> bool {
        let now = self.cache.now();
        entry.age_secs_at(now) <= self.debounce.as_secs() || (!force && !entry.is_stale_at(now))
    }

    fn decide(
        &self,
        current: String,
        release: Option<&ReleaseMetadata>,
        source: DecisionSource,
        diagnostic: Option<CheckDiagnostic>,
    ) -> UpdateDecision {
        let latest = release.map(|release| release.normalized_version().to_string());
        let update_available = latest
            .as_deref()
            .is_some_and(|latest| is_newer_version(latest, &current));
        let package_url = release
            .filter(|_| update_available)
            .map(|release| release.download_url.clone());

        UpdateDecision {
            current_version: current,
            latest_version: latest,
            update_available,
            package_url,
            checked_at: self.cache.now(),
            source,
            diagnostic,
        }
    }

    fn remember(&self, decision: UpdateDecision) -> UpdateDecision {
        *self
            .last_decision
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(decision.clone());
        decision
    }
}

/// Run `check_now(false)` every `every` until `cancel` fires. The first
/// check runs immediately.
pub fn spawn_periodic(
    scheduler: Arc<UpdateScheduler>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Periodic update check stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let decision = scheduler.check_now(false).await;
                    match &decision.diagnostic {
                        Some(diagnostic) => debug!("Scheduled check degraded: {}", diagnostic.reason),
                        None => debug!(
                            "Scheduled check: update_available={}",
                            decision.update_available
                        ),
                    }
                }
            }
        }
    })
}
