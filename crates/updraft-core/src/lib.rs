//! Self-update core for a hosted package.
//!
//! This crate owns update resolution and installation:
//! - Tolerant version comparison of release tags.
//! - Latest-release lookups against a GitHub-style registry.
//! - A TTL cache of the last release response with a single-flight refresh
//!   guard.
//! - Reconciliation of the two identifiers a host may track the package by.
//! - Directory normalization and backup-before-overwrite package swaps.
//! - The install state machine and the periodic/manual check scheduler.

pub mod clock;
mod error;
pub mod fetch;
mod identity;
mod install;
mod normalize;
pub mod registry;
mod release_cache;
mod scheduler;
pub mod store;
mod swap;
mod updater;
mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ErrorKind;
pub use fetch::ZipballFetcher;
pub use identity::{IdentityReconciler, InstalledIdentity};
pub use install::{InstallError, InstallResult, UpdateInstaller};
pub use normalize::{DirectoryNormalizer, NormalizeError, Normalized};
pub use registry::{
    FetchError, FetchedRelease, RateLimit, RegistryClient, ReleaseAsset, ReleaseMetadata,
    ReleaseSource, RepoTarget,
};
pub use release_cache::{CacheEntry, Invalidate, LAST_CHECK_KEY, LATEST_RELEASE_KEY, ReleaseCache};
pub use scheduler::{
    CheckDiagnostic, DecisionSource, UpdateDecision, UpdateScheduler, spawn_periodic,
};
pub use store::{JsonFileStore, MemoryStore};
pub use swap::BackupSwapper;
pub use updater::{ConnectionReport, HostServices, Updater, UpdaterConfig, UpdaterStatus};
pub use version::{compare_versions, is_newer_version, normalize_tag};
