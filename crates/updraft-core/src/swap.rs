use std::path::Path;
use std::sync::Arc;

use log::info;
use updraft_host::{HostError, PackageSwapper, SwapFailure, SwapOutcome};

use crate::clock::Clock;
use crate::normalize::{DirectoryNormalizer, NormalizeError};

/// Swaps a staged package into place by moving the live directory aside
/// to a timestamped backup first. Backups are never removed automatically.
#[derive(Clone)]
pub struct BackupSwapper {
    normalizer: DirectoryNormalizer,
}

impl BackupSwapper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            normalizer: DirectoryNormalizer::new(clock),
        }
    }
}

impl PackageSwapper for BackupSwapper {
    fn swap_in(&self, staged: &Path, live: &Path) -> Result<SwapOutcome, SwapFailure> {
        if let Some(parent) = live.parent() {
            std::fs::create_dir_all(parent).map_err(HostError::from)?;
        }

        match self.normalizer.replace_dir(staged, live) {
            Ok(backup_path) => {
                info!("Swapped {} into {}", staged.display(), live.display());
                Ok(SwapOutcome { backup_path })
            }
            Err(error) => Err(SwapFailure {
                backup_path: error.backup_path().map(Path::to_path_buf),
                error: host_error(&error),
            }),
        }
    }
}

fn host_error(error: &NormalizeError) -> HostError {
    let kind = match error {
        NormalizeError::Backup { source, .. } | NormalizeError::Move { source, .. } => {
            source.kind()
        }
        NormalizeError::SourceMissing { .. } | NormalizeError::NoParent { .. } => {
            std::io::ErrorKind::NotFound
        }
    };
    HostError::IoError {
        kind,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use updraft_host::{HostError, PackageSwapper};

    use super::BackupSwapper;
    use crate::clock::SystemClock;

    #[test]
    fn swap_into_empty_location_creates_no_backup() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let staged = temp_dir.path().join("work").join("Clothing_Form");
        std::fs::create_dir_all(&staged).expect("staged dir should be created");
        std::fs::write(staged.join("VERSION"), "2.5.10").expect("staged file written");
        let live = temp_dir.path().join("plugins").join("Clothing_Form");

        let outcome = BackupSwapper::new(Arc::new(SystemClock))
            .swap_in(&staged, &live)
            .expect("swap succeeds");

        assert!(outcome.backup_path.is_none());
        assert_eq!(
            std::fs::read_to_string(live.join("VERSION")).expect("live file present"),
            "2.5.10"
        );
        assert!(!staged.exists());
    }

    #[test]
    fn swap_over_live_package_keeps_backup() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let staged = temp_dir.path().join("work").join("Clothing_Form");
        let live = temp_dir.path().join("plugins").join("Clothing_Form");
        std::fs::create_dir_all(&staged).expect("staged dir should be created");
        std::fs::create_dir_all(&live).expect("live dir should be created");
        std::fs::write(staged.join("VERSION"), "2.5.10").expect("staged file written");
        std::fs::write(live.join("VERSION"), "2.5.9").expect("live file written");

        let outcome = BackupSwapper::new(Arc::new(SystemClock))
            .swap_in(&staged, &live)
            .expect("swap succeeds");

        let backup = outcome.backup_path.expect("backup created");
        assert_eq!(backup.parent(), live.parent());
        assert_eq!(
            std::fs::read_to_string(backup.join("VERSION")).expect("backup file present"),
            "2.5.9"
        );
        assert_eq!(
            std::fs::read_to_string(live.join("VERSION")).expect("live file present"),
            "2.5.10"
        );
    }

    #[test]
    fn failed_swap_restores_live_package() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let live = temp_dir.path().join("plugins").join("Clothing_Form");
        std::fs::create_dir_all(&live).expect("live dir should be created");
        std::fs::write(live.join("VERSION"), "2.5.9").expect("live file written");

        let failure = BackupSwapper::new(Arc::new(SystemClock))
            .swap_in(&temp_dir.path().join("missing"), &live)
            .expect_err("missing staged dir fails");

        assert!(failure.backup_path.is_none());
        assert!(matches!(failure.error, HostError::IoError { .. }));
        assert_eq!(
            std::fs::read_to_string(live.join("VERSION")).expect("live restored"),
            "2.5.9"
        );
    }
}
