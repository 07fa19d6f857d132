use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use updraft_host::{
    FetchStage, HostError, InstallPhase, PackageFetcher, PackageHost, PackageSwapper,
};

use crate::error::ErrorKind;
use crate::normalize::{DirectoryNormalizer, NormalizeError};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("install already in progress")]
    Busy,

    #[error("failed to fetch package: {0}")]
    Fetch(#[source] HostError),

    #[error("failed to prepare work directory {}: {source}", path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("failed to swap package into place: {0}")]
    Swap(#[source] HostError),

    #[error("package installed but reactivation failed: {0}")]
    Activation(#[source] HostError),
}

impl InstallError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::Fetch(HostError::FetchFailed {
                stage: FetchStage::Request | FetchStage::Download,
                ..
            }) => ErrorKind::Network,
            Self::Fetch(_) | Self::WorkDir { .. } | Self::Normalize(_) | Self::Swap(_) => {
                ErrorKind::Filesystem
            }
            Self::Activation(_) => ErrorKind::Activation,
        }
    }
}

/// Outcome of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    pub installed_version: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// A backup the operator may need to restore or remove. Never deleted
    /// automatically.
    pub backup_path: Option<PathBuf>,
    /// Last phase reached: `Done` on success, `Failed` otherwise.
    pub phase: InstallPhase,
    /// Whether the new files reached the live location.
    pub swapped: bool,
    /// Unpacked package left in the work directory after a failed
    /// normalize or swap.
    #[serde(default)]
    pub staged_path: Option<PathBuf>,
}

impl InstallResult {
    fn failed(error: &InstallError, backup_path: Option<PathBuf>) -> Self {
        Self {
            success: false,
            installed_version: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            backup_path,
            phase: InstallPhase::Failed,
            swapped: false,
            staged_path: None,
        }
    }

    fn with_staged(mut self, work_dir: TempDir, staged: &Path) -> Self {
        let root = work_dir.keep();
        let kept = if staged.exists() {
            staged.to_path_buf()
        } else {
            root
        };
        warn!("Keeping unpacked package at {}", kept.display());
        self.staged_path = Some(kept);
        self
    }
}

/// Orchestrates fetch, normalize, swap and reactivation.
pub struct UpdateInstaller {
    fetcher: Arc<dyn PackageFetcher>,
    swapper: Arc<dyn PackageSwapper>,
    host: Arc<dyn PackageHost>,
    normalizer: DirectoryNormalizer,
    live_dir: PathBuf,
    canonical_name: String,
    work_root: PathBuf,
    busy: Mutex<()>,
}

impl UpdateInstaller {
    pub fn new(
        fetcher: Arc<dyn PackageFetcher>,
        swapper: Arc<dyn PackageSwapper>,
        host: Arc<dyn PackageHost>,
        normalizer: DirectoryNormalizer,
        live_dir: impl Into<PathBuf>,
        canonical_name: impl Into<String>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            swapper,
            host,
            normalizer,
            live_dir: live_dir.into(),
            canonical_name: canonical_name.into(),
            work_root: work_root.into(),
            busy: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn live_dir(&self) -> &Path {
        &self.live_dir
    }

    pub async fn install(&self, package_url: &str, was_active: bool) -> InstallResult {
        self.install_with_progress(package_url, was_active, None)
            .await
    }

    /// Install and report each phase on `progress`.
    pub async fn install_with_progress(
        &self,
        package_url: &str,
        was_active: bool,
        progress: Option<&mpsc::Sender<InstallPhase>>,
    ) -> InstallResult {
        let Ok(_guard) = self.busy.try_lock() else {
            warn!("Install requested while another install is running");
            return InstallResult::failed(&InstallError::Busy, None);
        };

        let report = |phase: InstallPhase| async move {
            info!("Install phase: {phase}");
            if let Some(progress) = progress {
                let _ = progress.send(phase).await;
            }
        };

        let result = self.run(package_url, was_active, &report).await;
        report(result.phase).await;
        result
    }

    async fn run<F, Fut>(&self, package_url: &str, was_active: bool, report: &F) -> InstallResult
    where
        F: Fn(InstallPhase) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        report(InstallPhase::FetchingPackage).await;
        if let Err(source) = std::fs::create_dir_all(&self.work_root) {
            let error = InstallError::WorkDir {
                path: self.work_root.clone(),
                source,
            };
            return InstallResult::failed(&error, None);
        }
        let work_dir = match tempfile::tempdir_in(&self.work_root) {
            Ok(dir) => dir,
            Err(source) => {
                let error = InstallError::WorkDir {
                    path: self.work_root.clone(),
                    source,
                };
                return InstallResult::failed(&error, None);
            }
        };

        let extracted = match self
            .fetcher
            .fetch_and_unpack(package_url, work_dir.path())
            .await
        {
            Ok(path) => path,
            Err(error) => return InstallResult::failed(&InstallError::Fetch(error), None),
        };
        report(InstallPhase::Extracted).await;

        report(InstallPhase::Normalizing).await;
        let normalized = match self.normalizer.normalize(&extracted, &self.canonical_name) {
            Ok(normalized) => normalized,
            Err(error) => {
                let backup = error.backup_path().map(Path::to_path_buf);
                return InstallResult::failed(&InstallError::Normalize(error), backup)
                    .with_staged(work_dir, &extracted);
            }
        };

        let swap = match self.swapper.swap_in(&normalized.path, &self.live_dir) {
            Ok(outcome) => outcome,
            Err(failure) => {
                return InstallResult::failed(
                    &InstallError::Swap(failure.error),
                    failure.backup_path,
                )
                .with_staged(work_dir, &normalized.path);
            }
        };
        report(InstallPhase::Swapped).await;

        let installed_version = self.host.installed_version();
        let mut result = InstallResult {
            success: true,
            installed_version: Some(installed_version.clone()),
            error: None,
            error_kind: None,
            backup_path: swap.backup_path,
            phase: InstallPhase::Done,
            swapped: true,
            staged_path: None,
        };

        if was_active {
            report(InstallPhase::Reactivating).await;
        }
        // The swapped files stay in place when activation fails.
        if let Err(error) = self.host.reactivate_if(was_active).await {
            let error = InstallError::Activation(error);
            warn!("{error}");
            result.success = false;
            result.error = Some(error.to_string());
            result.error_kind = Some(error.kind());
            result.phase = InstallPhase::Failed;
            return result;
        }

        info!("Installed version {installed_version}");
        result
    }
}
