use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse classification shared by check and install failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failure or timeout.
    Network,
    /// The registry answered with a non-success status.
    Api,
    /// The registry answered 200 with a body we could not use.
    Malformed,
    /// Moving, copying or deleting package directories failed.
    Filesystem,
    /// The package was swapped in but could not be re-activated.
    Activation,
    /// Another install was already running.
    Busy,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Network => "network",
            Self::Api => "api",
            Self::Malformed => "malformed",
            Self::Filesystem => "filesystem",
            Self::Activation => "activation",
            Self::Busy => "busy",
        };
        f.write_str(label)
    }
}
