//! Seams between the updater core and the application hosting the package.
//!
//! The core never reaches into the host directly: it reads the installed
//! version, asks whether the package is active, re-activates it, persists
//! small key-value blobs, and delegates download/unpack and the final swap
//! through the traits defined here.

mod error;
mod traits;
mod types;

pub use error::{FetchStage, HostError};
pub use traits::{KeyValueStore, PackageFetcher, PackageHost, PackageSwapper, VersionRecord};
pub use types::{InstallPhase, SwapFailure, SwapOutcome};
