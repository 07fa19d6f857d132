use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::HostError;
use crate::types::{SwapFailure, SwapOutcome};

/// Lifecycle hooks of the hosted package.
#[async_trait]
pub trait PackageHost: Send + Sync {
    /// Version string of the package currently on disk.
    fn installed_version(&self) -> String;

    fn is_active(&self) -> bool;

    async fn activate(&self) -> Result<(), HostError>;

    /// Re-activate the package when it was active before an install.
    /// Returns whether activation was attempted.
    async fn reactivate_if(&self, was_active: bool) -> Result<bool, HostError> {
        if !was_active {
            return Ok(false);
        }
        self.activate().await?;
        Ok(true)
    }
}

/// The host's "installed version" bookkeeping, keyed by package identifier.
pub trait VersionRecord: Send + Sync {
    fn version_of(&self, identifier: &str) -> Option<String>;

    /// # Errors
    /// Returns an error when the record cannot be persisted.
    fn record(&self, identifier: &str, version: &str) -> Result<(), HostError>;
}

/// Persisted string store. Writes are last-writer-wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    /// Returns an error when the value cannot be persisted.
    fn set(&self, key: &str, value: &str) -> Result<(), HostError>;

    /// Removing a missing key is not an error.
    ///
    /// # Errors
    /// Returns an error when the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), HostError>;
}

/// Downloads a package archive and unpacks it below `work_dir`.
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// Returns the directory holding the unpacked package.
    async fn fetch_and_unpack(
        &self,
        package_url: &str,
        work_dir: &Path,
    ) -> Result<PathBuf, HostError>;
}

/// Moves a staged package directory into the live install location.
pub trait PackageSwapper: Send + Sync {
    /// # Errors
    /// Returns a failure carrying any backup left behind when the swap
    /// cannot be completed.
    fn swap_in(&self, staged: &Path, live: &Path) -> Result<SwapOutcome, SwapFailure>;
}
