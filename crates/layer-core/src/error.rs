use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::report::SizeReport;
use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Corrupt artifact {}: {reason}", .path.display())]
    CorruptArtifact { path: PathBuf, reason: String },

    #[error("{}", .0.summary())]
    OversizeArtifact(Box<SizeReport>),

    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload to {address} failed: {message}")]
    UploadFailure { address: String, message: String },

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("{0} cancelled")]
    Cancelled(Stage),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LayerError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Exit status the CLI reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LayerError::OversizeArtifact(_) => 2,
            LayerError::UploadFailure { .. } => 3,
            LayerError::Timeout { .. } => 4,
            LayerError::Cancelled(_) => 130,
            _ => 1,
        }
    }

    /// Whether the orchestrating caller may safely re-run the failed stage.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LayerError::UploadFailure { .. }
                | LayerError::Timeout {
                    stage: Stage::Publish,
                    ..
                }
        )
    }

    /// The size report behind an oversize verdict.
    pub fn oversize_report(&self) -> Option<&SizeReport> {
        match self {
            LayerError::OversizeArtifact(report) => Some(&**report),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LayerError>;
