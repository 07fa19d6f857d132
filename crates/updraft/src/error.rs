use std::path::PathBuf;

use thiserror::Error;
use updraft_host::HostError;
use updraft_platform::AppPathsError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] AppPathsError),

    #[error("`{field}` is not configured, set it in {}", settings.display())]
    NotConfigured {
        field: &'static str,
        settings: PathBuf,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}
