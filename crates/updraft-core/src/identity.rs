use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use updraft_host::{HostError, VersionRecord};

/// The two identifiers a host may use for the installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledIdentity {
    /// Derived from the directory the package really lives in.
    pub actual_identifier: String,
    /// The name the host expects the package under.
    pub canonical_identifier: String,
}

impl InstalledIdentity {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.actual_identifier == self.canonical_identifier
    }
}

/// Keeps the host's version record consistent for both identifiers.
///
/// Extraction can leave the package in a directory whose name differs from
/// the canonical one (`pkg-2.5.9/` instead of `Clothing_Form/`). The host
/// then tracks the package under one identifier while looking for updates
/// under the other. Recording the installed version under both closes the
/// gap.
pub struct IdentityReconciler {
    install_path: RwLock<PathBuf>,
    canonical_name: String,
    entry_file: Option<String>,
    record: Arc<dyn VersionRecord>,
}

impl IdentityReconciler {
    pub fn new(
        install_path: impl Into<PathBuf>,
        canonical_name: impl Into<String>,
        entry_file: Option<String>,
        record: Arc<dyn VersionRecord>,
    ) -> Self {
        Self {
            install_path: RwLock::new(install_path.into()),
            canonical_name: canonical_name.into(),
            entry_file,
            record,
        }
    }

    #[must_use]
    pub fn install_path(&self) -> PathBuf {
        self.install_path
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Point the reconciler at a new install directory.
    pub fn relocate(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!("Install path is now {}", path.display());
        *self
            .install_path
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = path;
    }

    /// Derive both identifiers from the real on-disk location right now.
    #[must_use]
    pub fn identity(&self) -> InstalledIdentity {
        let configured = self.install_path();
        let resolved = std::fs::canonicalize(&configured).unwrap_or(configured);
        let dir_name = dir_name(&resolved).unwrap_or_else(|| self.canonical_name.clone());

        InstalledIdentity {
            actual_identifier: self.identifier_for(&dir_name),
            canonical_identifier: self.identifier_for(&self.canonical_name),
        }
    }

    /// Record `installed_version` under both identifiers. Writes only the
    /// identifiers whose recorded version differs, so repeated calls are
    /// no-ops.
    ///
    /// # Errors
    /// Returns an error when the host record cannot be written.
    pub fn reconcile(&self, installed_version: &str) -> Result<InstalledIdentity, HostError> {
        let identity = self.identity();

        let mut identifiers = vec![identity.actual_identifier.as_str()];
        if !identity.is_consistent() {
            identifiers.push(identity.canonical_identifier.as_str());
        }

        for identifier in identifiers {
            self.record_if_changed(identifier, installed_version)?;
        }

        Ok(identity)
    }

    /// Relocate to `path` after an install, then reconcile. The identifier
    /// the package was tracked under before the move also gets the new
    /// version, so the host does not keep a stale entry for it.
    ///
    /// # Errors
    /// Returns an error when the host record cannot be written.
    pub fn relocate_and_reconcile(
        &self,
        path: impl Into<PathBuf>,
        installed_version: &str,
    ) -> Result<InstalledIdentity, HostError> {
        let before = self.identity();
        self.relocate(path);
        let after = self.reconcile(installed_version)?;

        if before.actual_identifier != after.actual_identifier
            && before.actual_identifier != after.canonical_identifier
        {
            self.record_if_changed(&before.actual_identifier, installed_version)?;
        }
        Ok(after)
    }

    fn record_if_changed(&self, identifier: &str, installed_version: &str) -> Result<(), HostError> {
        if self.record.version_of(identifier).as_deref() != Some(installed_version) {
            self.record.record(identifier, installed_version)?;
            info!("Recorded {identifier} at version {installed_version}");
        }
        Ok(())
    }

    fn identifier_for(&self, dir_name: &str) -> String {
        match &self.entry_file {
            Some(entry) => format!("{dir_name}/{entry}"),
            None => dir_name.to_string(),
        }
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
