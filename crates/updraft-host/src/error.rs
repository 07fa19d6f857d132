use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Activation failed: {details}")]
    ActivationFailed { details: String },

    #[error("Host command failed: {stderr}")]
    CommandFailed { stderr: String },

    #[error("Package fetch failed during {stage}: {details}")]
    FetchFailed { stage: FetchStage, details: String },

    #[error("IO error ({kind}): {message}")]
    IoError {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Store error in {context}: {details}")]
    Store {
        context: &'static str,
        details: String,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    #[error("request")]
    Request,
    #[error("download")]
    Download,
    #[error("extract")]
    Extract,
}

impl HostError {
    pub fn activation(details: impl Into<String>) -> Self {
        Self::ActivationFailed {
            details: details.into(),
        }
    }

    pub fn fetch(stage: FetchStage, details: impl Into<String>) -> Self {
        Self::FetchFailed {
            stage,
            details: details.into(),
        }
    }

    pub fn fetch_from<E>(stage: FetchStage, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::fetch(stage, error.to_string())
    }

    pub fn store<E>(context: &'static str, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::Store {
            context,
            details: error.to_string(),
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::IoError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
