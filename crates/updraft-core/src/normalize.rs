use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::clock::Clock;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("extracted package not found at {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("extracted package path {} has no parent directory", path.display())]
    NoParent { path: PathBuf },

    #[error("failed to back up {} to {}: {source}", from.display(), to.display())]
    Backup {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        /// Set when the previous directory could not be put back.
        backup_path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },
}

impl NormalizeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Filesystem
    }

    /// A backup left behind that an operator must restore by hand.
    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            Self::Move { backup_path, .. } => backup_path.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub path: PathBuf,
    /// Where a pre-existing directory with the canonical name was moved.
    pub backup_path: Option<PathBuf>,
}

/// Renames a freshly extracted package directory to its canonical name.
#[derive(Clone)]
pub struct DirectoryNormalizer {
    clock: Arc<dyn Clock>,
}

impl DirectoryNormalizer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Move `extracted` to a sibling directory called `canonical_name`.
    ///
    /// An existing directory at the destination is moved aside to
    /// `<canonical_name>_backup_<timestamp>` first, never deleted. On
    /// failure `extracted` is left where it was.
    ///
    /// # Errors
    /// Returns a filesystem error when the source is missing or a move
    /// fails.
    pub fn normalize(
        &self,
        extracted: &Path,
        canonical_name: &str,
    ) -> Result<Normalized, NormalizeError> {
        if !extracted.is_dir() {
            return Err(NormalizeError::SourceMissing {
                path: extracted.to_path_buf(),
            });
        }

        if extracted.file_name().and_then(|n| n.to_str()) == Some(canonical_name) {
            debug!("{} already has its canonical name", extracted.display());
            return Ok(Normalized {
                path: extracted.to_path_buf(),
                backup_path: None,
            });
        }

        let parent = extracted.parent().ok_or_else(|| NormalizeError::NoParent {
            path: extracted.to_path_buf(),
        })?;
        let destination = parent.join(canonical_name);

        let backup_path = self.replace_dir(extracted, &destination)?;
        info!(
            "Normalized {} to {}",
            extracted.display(),
            destination.display()
        );
        Ok(Normalized {
            path: destination,
            backup_path,
        })
    }

    /// Move `source` to `destination`, backing up whatever is already at
    /// `destination`. Returns the backup location, if one was made.
    pub(crate) fn replace_dir(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Option<PathBuf>, NormalizeError> {
        let backup_path = if destination.exists() {
            let backup = self.backup_path_for(destination);
            std::fs::rename(destination, &backup).map_err(|source| NormalizeError::Backup {
                from: destination.to_path_buf(),
                to: backup.clone(),
                source,
            })?;
            info!(
                "Backed up {} to {}",
                destination.display(),
                backup.display()
            );
            Some(backup)
        } else {
            None
        };

        if let Err(error) = move_dir(source, destination) {
            let stranded = match &backup_path {
                Some(backup) => match std::fs::rename(backup, destination) {
                    Ok(()) => {
                        warn!("Move failed, restored {}", destination.display());
                        None
                    }
                    Err(restore_error) => {
                        warn!(
                            "Move failed and {} could not be restored: {restore_error}",
                            backup.display()
                        );
                        Some(backup.clone())
                    }
                },
                None => None,
            };
            return Err(NormalizeError::Move {
                from: source.to_path_buf(),
                to: destination.to_path_buf(),
                backup_path: stranded,
                source: error,
            });
        }

        Ok(backup_path)
    }

    /// `<dir>_backup_<YYYYmmddHHMMSS>`, suffixed with a counter when taken.
    fn backup_path_for(&self, dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map_or_else(|| "package".into(), |n| n.to_string_lossy().into_owned());
        let stamp = self.clock.now().format("%Y%m%d%H%M%S");
        let base = dir.with_file_name(format!("{name}_backup_{stamp}"));
        if !base.exists() {
            return base;
        }
        (1_u32..)
            .map(|n| dir.with_file_name(format!("{name}_backup_{stamp}_{n}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }
}

/// Rename, falling back to copy + delete across filesystems. A failed copy
/// removes its partial output and leaves `src` intact. Once the copy is
/// complete `dest` is authoritative, and a leftover `src` is only logged.
pub(crate) fn move_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    if !src.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        ));
    }

    if let Err(error) = copy_dir_recursive(src, dest) {
        let _ = std::fs::remove_dir_all(dest);
        return Err(error);
    }
    if let Err(error) = std::fs::remove_dir_all(src) {
        warn!(
            "Copied {} to {} but could not remove the source: {error}",
            src.display(),
            dest.display()
        );
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            std::fs::copy(&src_path, &dest_path).map_err(|error| {
                std::io::Error::new(
                    error.kind(),
                    format!("{} -> {}: {error}", src_path.display(), dest_path.display()),
                )
            })?;
        }
    }
    Ok(())
}
