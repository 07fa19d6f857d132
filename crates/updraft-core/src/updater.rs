//! The operator-facing entry point tying cache, registry, scheduler and
//! installer together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use updraft_host::{
    HostError, InstallPhase, KeyValueStore, PackageFetcher, PackageHost, PackageSwapper,
    VersionRecord,
};

use crate::clock::Clock;
use crate::identity::{IdentityReconciler, InstalledIdentity};
use crate::install::{InstallResult, UpdateInstaller};
use crate::normalize::DirectoryNormalizer;
use crate::registry::{RateLimit, ReleaseMetadata, ReleaseSource, RepoTarget};
use crate::release_cache::{Invalidate, ReleaseCache};
use crate::scheduler::{UpdateDecision, UpdateScheduler};

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub target: RepoTarget,
    /// `<plugins-root>/<canonical-name>`, where installs land.
    pub live_dir: PathBuf,
    /// Where the package lives right now, when that differs from
    /// `live_dir`.
    pub install_path: Option<PathBuf>,
    pub canonical_name: String,
    pub entry_file: Option<String>,
    /// Parent of the per-install temporary extraction directories.
    pub work_root: PathBuf,
    pub cache_ttl: Duration,
    pub debounce: Duration,
}

/// Everything the updater needs from its host.
#[derive(Clone)]
pub struct HostServices {
    pub host: Arc<dyn PackageHost>,
    pub record: Arc<dyn VersionRecord>,
    pub store: Arc<dyn KeyValueStore>,
    pub fetcher: Arc<dyn PackageFetcher>,
    pub swapper: Arc<dyn PackageSwapper>,
    pub source: Arc<dyn ReleaseSource>,
    pub clock: Arc<dyn Clock>,
}

/// Result of probing a registry with operator-supplied credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub ok: bool,
    /// Diagnostic label on failure, see [`crate::FetchError::reason`].
    pub reason: Option<String>,
    pub status: Option<u16>,
    pub latest_version: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterStatus {
    pub current_version: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub cached_release: Option<ReleaseMetadata>,
    pub cache_fresh: bool,
    pub identity: InstalledIdentity,
    pub last_decision: Option<UpdateDecision>,
}

pub struct Updater {
    scheduler: Arc<UpdateScheduler>,
    installer: UpdateInstaller,
    reconciler: Arc<IdentityReconciler>,
    cache: Arc<ReleaseCache>,
    source: Arc<dyn ReleaseSource>,
    host: Arc<dyn PackageHost>,
}

impl Updater {
    pub fn new(config: UpdaterConfig, services: HostServices) -> Self {
        let cache = Arc::new(ReleaseCache::new(
            services.store,
            services.clock.clone(),
            config.cache_ttl,
        ));
        let install_path = config
            .install_path
            .clone()
            .unwrap_or_else(|| config.live_dir.clone());
        let reconciler = Arc::new(IdentityReconciler::new(
            install_path,
            config.canonical_name.clone(),
            config.entry_file.clone(),
            services.record,
        ));
        let scheduler = Arc::new(UpdateScheduler::new(
            services.source.clone(),
            cache.clone(),
            reconciler.clone(),
            services.host.clone(),
            config.target,
            config.debounce,
        ));
        let installer = UpdateInstaller::new(
            services.fetcher,
            services.swapper,
            services.host.clone(),
            DirectoryNormalizer::new(services.clock),
            config.live_dir,
            config.canonical_name,
            config.work_root,
        );

        Self {
            scheduler,
            installer,
            reconciler,
            cache,
            source: services.source,
            host: services.host,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<UpdateScheduler> {
        self.scheduler.clone()
    }

    pub async fn check_now(&self, force: bool) -> UpdateDecision {
        self.scheduler.check_now(force).await
    }

    #[must_use]
    pub fn is_update_available(&self) -> bool {
        self.scheduler.is_update_available()
    }

    /// Install the latest release when one is newer than the installed
    /// version. Returns `None` when there is nothing to install.
    pub async fn install_update(&self) -> Option<InstallResult> {
        self.install_update_with_progress(None).await
    }

    pub async fn install_update_with_progress(
        &self,
        progress: Option<&mpsc::Sender<InstallPhase>>,
    ) -> Option<InstallResult> {
        let decision = self.scheduler.check_now(false).await;
        let package_url = decision.package_url.filter(|_| decision.update_available)?;

        let was_active = self.host.is_active();
        let result = self
            .installer
            .install_with_progress(&package_url, was_active, progress)
            .await;

        if result.swapped {
            self.after_swap(&result);
        }
        Some(result)
    }

    /// Drop cached registry responses and the last-check time.
    ///
    /// # Errors
    /// Returns an error when the cache store cannot be written.
    pub fn clear_cache(&self) -> Result<(), HostError> {
        self.cache.invalidate(Invalidate::All)?;
        self.scheduler.forget_last_decision();
        info!("Release cache cleared");
        Ok(())
    }

    /// Uncached probe of `owner/repo`. Never fails; problems are described
    /// in the report.
    pub async fn test_connection(
        &self,
        owner: &str,
        repo: &str,
        token: Option<String>,
    ) -> ConnectionReport {
        let target = RepoTarget::new(owner, repo).with_token(token);
        match self.source.fetch_latest(&target).await {
            Ok(fetched) => ConnectionReport {
                ok: true,
                reason: None,
                status: Some(200),
                latest_version: Some(fetched.release.normalized_version().to_string()),
                rate_limit: Some(fetched.rate_limit),
                message: format!(
                    "Connected to {owner}/{repo}, latest release {}",
                    fetched.release.version
                ),
            },
            Err(error) => {
                warn!("Connection test for {owner}/{repo} failed: {error}");
                ConnectionReport {
                    ok: false,
                    reason: Some(error.reason().to_string()),
                    status: error.status(),
                    latest_version: None,
                    rate_limit: error.rate_limit(),
                    message: error.to_string(),
                }
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> UpdaterStatus {
        let cached = self.cache.get_latest();
        UpdaterStatus {
            current_version: self.host.installed_version(),
            last_checked_at: self.cache.last_checked_at(),
            cache_fresh: cached
                .as_ref()
                .is_some_and(|entry| self.cache.is_fresh(entry)),
            cached_release: cached.map(|entry| entry.value),
            identity: self.reconciler.identity(),
            last_decision: self.scheduler.last_decision(),
        }
    }

    fn after_swap(&self, result: &InstallResult) {
        let version = result
            .installed_version
            .clone()
            .unwrap_or_else(|| self.host.installed_version());
        if let Err(error) = self
            .reconciler
            .relocate_and_reconcile(self.installer.live_dir(), &version)
        {
            warn!("Failed to reconcile identity after install: {error}");
        }
        if let Err(error) = self.cache.invalidate(Invalidate::All) {
            warn!("Failed to invalidate release cache after install: {error}");
        }
        self.scheduler.forget_last_decision();
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use updraft_host::{HostError, PackageFetcher, PackageHost, VersionRecord};

    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::{FetchError, FetchedRelease};
    use crate::store::MemoryStore;
    use crate::swap::BackupSwapper;

    struct OneRelease(&'static str);

    #[async_trait]
    impl ReleaseSource for OneRelease {
        async fn fetch_latest(&self, target: &RepoTarget) -> Result<FetchedRelease, FetchError> {
            if target.repo != "clothing-form" {
                return Err(FetchError::Api {
                    status: 404,
                    rate_limit: RateLimit::default(),
                    body_snippet: ": Not Found".to_string(),
                });
            }
            Ok(FetchedRelease {
                release: ReleaseMetadata {
                    version: self.0.to_string(),
                    published_at: None,
                    download_url: "https://example.com/pkg.zip".to_string(),
                    notes: "Fixes".to_string(),
                    assets: Vec::new(),
                    html_url: None,
                },
                rate_limit: RateLimit {
                    limit: Some(60),
                    remaining: Some(59),
                    reset_at: None,
                },
            })
        }
    }

    struct VersionedFetcher(&'static str);

    #[async_trait]
    impl PackageFetcher for VersionedFetcher {
        async fn fetch_and_unpack(
            &self,
            _package_url: &str,
            work_dir: &Path,
        ) -> Result<PathBuf, HostError> {
            let root = work_dir.join(format!("acme-clothing-form-{}", self.0));
            std::fs::create_dir_all(&root)?;
            std::fs::write(root.join("VERSION"), self.0)?;
            Ok(root)
        }
    }

    /// Reads the live directory once it exists, else the original install.
    struct DirHost {
        installed: PathBuf,
        live: PathBuf,
    }

    #[async_trait]
    impl PackageHost for DirHost {
        fn installed_version(&self) -> String {
            let dir = if self.live.exists() {
                &self.live
            } else {
                &self.installed
            };
            std::fs::read_to_string(dir.join("VERSION"))
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|_| "0.0.0".to_string())
        }

        fn is_active(&self) -> bool {
            false
        }

        async fn activate(&self) -> Result<(), HostError> {
            Ok(())
        }
    }

    struct Fixture {
        updater: Updater,
        record: Arc<MemoryStore>,
        live_dir: PathBuf,
        _temp: tempfile::TempDir,
    }

    fn fixture(installed_dir: &str) -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let plugins = temp.path().join("plugins");
        let installed = plugins.join(installed_dir);
        std::fs::create_dir_all(&installed).expect("installed dir created");
        std::fs::write(installed.join("VERSION"), "2.5.9").expect("version written");
        let live_dir = plugins.join("Clothing_Form");
        let record = Arc::new(MemoryStore::new());

        let config = UpdaterConfig {
            target: RepoTarget::new("acme", "clothing-form"),
            live_dir: live_dir.clone(),
            install_path: Some(installed.clone()),
            canonical_name: "Clothing_Form".to_string(),
            entry_file: None,
            work_root: temp.path().join("work"),
            cache_ttl: Duration::from_secs(3600),
            debounce: Duration::from_secs(5),
        };
        let services = HostServices {
            host: Arc::new(DirHost {
                installed,
                live: live_dir.clone(),
            }),
            record: record.clone(),
            store: Arc::new(MemoryStore::new()),
            fetcher: Arc::new(VersionedFetcher("2.5.10")),
            swapper: Arc::new(BackupSwapper::new(Arc::new(SystemClock))),
            source: Arc::new(OneRelease("v2.5.10")),
            clock: Arc::new(SystemClock),
        };

        Fixture {
            updater: Updater::new(config, services),
            record,
            live_dir,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn install_update_swaps_and_reconciles() {
        let f = fixture("pkg-2.5.9");

        let result = f
            .updater
            .install_update()
            .await
            .expect("an update is available");

        assert!(result.success, "unexpected failure: {:?}", result.error);
        assert_eq!(result.installed_version.as_deref(), Some("2.5.10"));
        assert_eq!(
            std::fs::read_to_string(f.live_dir.join("VERSION")).expect("live version"),
            "2.5.10"
        );
        let status = f.updater.status();
        assert!(status.identity.is_consistent());
        assert!(status.cached_release.is_none());
        assert!(status.last_decision.is_none());
        assert_eq!(
            f.record.version_of("Clothing_Form").as_deref(),
            Some("2.5.10")
        );
        assert_eq!(f.record.version_of("pkg-2.5.9").as_deref(), Some("2.5.10"));
    }

    #[tokio::test]
    async fn nothing_to_install_when_up_to_date() {
        let f = fixture("Clothing_Form");
        std::fs::write(f.live_dir.join("VERSION"), "2.6.0").expect("version written");

        assert!(f.updater.install_update().await.is_none());
        assert!(!f.updater.is_update_available());
    }

    #[tokio::test]
    async fn test_connection_reports_success_and_failure() {
        let f = fixture("Clothing_Form");

        let ok = f.updater.test_connection("acme", "clothing-form", None).await;
        let missing = f
            .updater
            .test_connection("acme", "nope", Some("secret".to_string()))
            .await;

        assert!(ok.ok);
        assert_eq!(ok.latest_version.as_deref(), Some("2.5.10"));
        assert_eq!(ok.rate_limit.and_then(|r| r.remaining), Some(59));
        assert!(!missing.ok);
        assert_eq!(missing.reason.as_deref(), Some("not_found"));
        assert_eq!(missing.status, Some(404));
        assert!(f.updater.status().cached_release.is_none());
    }

    #[tokio::test]
    async fn clear_cache_forgets_release_and_check_time() {
        let f = fixture("Clothing_Form");
        f.updater.check_now(false).await;
        assert!(f.updater.status().last_checked_at.is_some());

        f.updater.clear_cache().expect("cache cleared");

        let status = f.updater.status();
        assert!(status.last_checked_at.is_none());
        assert!(status.cached_release.is_none());
        assert!(!status.cache_fresh);
        assert!(status.last_decision.is_none());
    }
}
