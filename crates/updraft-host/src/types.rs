use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Phases an install walks through. `Failed` is reachable from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallPhase {
    FetchingPackage,
    Extracted,
    Normalizing,
    Swapped,
    Reactivating,
    Done,
    Failed,
}

impl InstallPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FetchingPackage => "fetching package",
            Self::Extracted => "extracted",
            Self::Normalizing => "normalizing",
            Self::Swapped => "swapped",
            Self::Reactivating => "reactivating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Result of moving a staged package into its live location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Where the previous live directory was moved, if one existed.
    pub backup_path: Option<PathBuf>,
}

/// A failed swap. `backup_path` is set when the previous live directory
/// still sits in its backup location and needs an operator to restore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapFailure {
    pub error: HostError,
    pub backup_path: Option<PathBuf>,
}

impl From<HostError> for SwapFailure {
    fn from(error: HostError) -> Self {
        Self {
            error,
            backup_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::InstallPhase;

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(InstallPhase::Done.is_terminal());
        assert!(InstallPhase::Failed.is_terminal());
        assert!(!InstallPhase::FetchingPackage.is_terminal());
        assert!(!InstallPhase::Swapped.is_terminal());
        assert!(!InstallPhase::Reactivating.is_terminal());
    }

    #[test]
    fn display_uses_lowercase_labels() {
        assert_eq!(InstallPhase::FetchingPackage.to_string(), "fetching package");
        assert_eq!(InstallPhase::Normalizing.to_string(), "normalizing");
    }
}
