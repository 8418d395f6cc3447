use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LayerError, Result};
use crate::report::SizeReport;

/// The packaged dependency archive, identified by name and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

impl Artifact {
    /// Describe the artifact `name` inside `dir` without touching the filesystem.
    pub fn at(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: dir.as_ref().join(&name),
            name,
        }
    }

    /// Fail with `ArtifactNotFound` unless the file is present right now.
    pub fn ensure_present(&self) -> Result<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            _ => Err(LayerError::ArtifactNotFound(self.path.clone())),
        }
    }

    /// Sibling path the build environment writes into before the final rename.
    pub fn partial_path(&self) -> PathBuf {
        let file_name = format!(".{}.partial", self.name);
        match self.path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

/// An artifact whose most recent size report passed the ceiling.
///
/// Publishing takes this type, so only a passing verdict can reach it.
#[derive(Debug, Clone)]
pub struct ValidatedArtifact {
    artifact: Artifact,
    report: SizeReport,
}

impl ValidatedArtifact {
    pub fn new(artifact: Artifact, report: SizeReport) -> Result<Self> {
        if report.artifact() != artifact.path.as_path() {
            return Err(LayerError::Config(format!(
                "size report for {} does not describe {}",
                report.artifact().display(),
                artifact.path.display()
            )));
        }
        if !report.passed() {
            return Err(LayerError::OversizeArtifact(Box::new(report)));
        }
        Ok(Self { artifact, report })
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn report(&self) -> &SizeReport {
        &self.report
    }
}
