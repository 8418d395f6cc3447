//! Build environment trait

use async_trait::async_trait;
use layer_config::Config;
use layer_core::{Artifact, LayerError, Result};
use std::path::{Path, PathBuf};

/// Everything the build environment needs to produce the artifact
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub image: String,
    pub working_dir: PathBuf,
    pub dependencies: Vec<String>,
    pub install_command: String,
    pub package_command: String,
    pub artifact_dir: PathBuf,
    pub artifact_name: String,
}

impl BuildSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            image: config.build.image.clone(),
            working_dir: config.build.working_dir.clone(),
            dependencies: config.build.dependencies.clone(),
            install_command: config.build.install_command.clone(),
            package_command: config.build.package_command.clone(),
            artifact_dir: config.artifact.dir.clone(),
            artifact_name: config.artifact.name.clone(),
        }
    }

    pub fn artifact(&self) -> Artifact {
        Artifact::at(&self.artifact_dir, &self.artifact_name)
    }

    /// Dependencies as a single space-separated argument.
    pub fn dependency_arg(&self) -> String {
        self.dependencies.join(" ")
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(LayerError::Config("build.image is empty".to_string()));
        }
        if self.dependencies.is_empty() {
            return Err(LayerError::Config(
                "no dependencies declared in build.dependencies".to_string(),
            ));
        }
        if let Some(dep) = self
            .dependencies
            .iter()
            .find(|d| d.is_empty() || d.chars().any(char::is_whitespace))
        {
            return Err(LayerError::Config(format!(
                "dependency '{}' must be a single specifier without whitespace",
                dep
            )));
        }
        if !self.working_dir.is_dir() {
            return Err(LayerError::Config(format!(
                "build working directory does not exist: {}",
                self.working_dir.display()
            )));
        }
        Ok(())
    }
}

/// Names of the disposable resources behind one build.
///
/// Allocated before provisioning starts so teardown can always find them,
/// even when provisioning is interrupted half way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentHandle {
    pub container: String,
    pub image: String,
}

impl EnvironmentHandle {
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("layer-build-{}", &id[..12]);
        Self {
            container: name.clone(),
            image: name,
        }
    }
}

/// Trait for isolated, disposable build environments
#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Create the environment and install the declared dependencies
    async fn provision(&self, handle: &EnvironmentHandle, spec: &BuildSpec) -> Result<()>;

    /// Run the packaging step and copy the archive to `output`
    async fn execute(&self, handle: &EnvironmentHandle, spec: &BuildSpec, output: &Path)
    -> Result<()>;

    /// Remove everything `provision` created. Must succeed for resources
    /// that were never created.
    async fn teardown(&self, handle: &EnvironmentHandle) -> Result<()>;

    /// Same as `teardown`, callable from `Drop`
    fn teardown_blocking(&self, handle: &EnvironmentHandle) -> Result<()>;
}
