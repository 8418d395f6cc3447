use layer_core::{Artifact, Cancellation, LayerError, Result, Stage, bounded};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::environment::{BuildEnvironment, BuildSpec, EnvironmentHandle};
use crate::scope::EnvironmentScope;

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildReceipt {
    pub artifact: Artifact,
    pub bytes: u64,
    pub duration: Duration,
    /// Set when the build succeeded but the environment was not fully removed
    pub teardown_error: Option<String>,
}

/// Upper bound on removing the environment after a build.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Builder {
    env: Arc<dyn BuildEnvironment>,
    timeout: Duration,
    teardown_timeout: Duration,
}

impl Builder {
    pub fn new(env: Arc<dyn BuildEnvironment>, timeout: Duration) -> Self {
        Self {
            env,
            timeout,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }

    pub fn with_teardown_timeout(mut self, limit: Duration) -> Self {
        self.teardown_timeout = limit;
        self
    }

    /// Produce the artifact described by `spec`.
    ///
    /// The environment writes to a hidden partial file which is renamed
    /// into place only when the environment succeeded and the file exists
    /// and is not empty. On every other path no artifact is left behind.
    pub async fn build(&self, spec: &BuildSpec, cancel: &Cancellation) -> Result<BuildReceipt> {
        spec.validate()?;

        let artifact = spec.artifact();
        let partial = artifact.partial_path();
        prepare_output(&artifact, &partial)?;

        let started = Instant::now();
        let scope = EnvironmentScope::new(self.env.as_ref(), EnvironmentHandle::generate());
        info!(
            "Building {} in {} environment {}",
            artifact.name,
            self.env.name(),
            scope.handle().container
        );

        let outcome = bounded(Stage::Build, self.timeout, cancel, async {
            self.env.provision(scope.handle(), spec).await?;
            self.env.execute(scope.handle(), spec, &partial).await
        })
        .await;

        let teardown_error = match scope.release(self.teardown_timeout).await {
            Ok(()) => None,
            Err(e) => {
                error!("Build environment cleanup failed: {}", e);
                Some(e.to_string())
            }
        };

        let result = outcome.and_then(|()| promote(&partial, &artifact));
        match result {
            Ok(bytes) => {
                let duration = started.elapsed();
                info!(
                    "Built {} ({} bytes) in {:.1}s",
                    artifact.path.display(),
                    bytes,
                    duration.as_secs_f64()
                );
                Ok(BuildReceipt {
                    artifact,
                    bytes,
                    duration,
                    teardown_error,
                })
            }
            Err(e) => {
                discard(&partial);
                Err(e)
            }
        }
    }
}

/// Create the artifact directory and clear any artifact a previous run left.
fn prepare_output(artifact: &Artifact, partial: &Path) -> Result<()> {
    if let Some(dir) = artifact.path.parent()
        && !dir.as_os_str().is_empty()
    {
        std::fs::create_dir_all(dir)
            .map_err(|e| LayerError::io(format!("creating {}", dir.display()), e))?;
    }

    for stale in [artifact.path.as_path(), partial] {
        match std::fs::remove_file(stale) {
            Ok(()) => warn!("Removed stale {}", stale.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(LayerError::io(format!("removing {}", stale.display()), e)),
        }
    }
    Ok(())
}

/// Move the partial output into place, insisting it exists and has content.
fn promote(partial: &Path, artifact: &Artifact) -> Result<u64> {
    let bytes = match std::fs::metadata(partial) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            return Err(LayerError::BuildFailure(format!(
                "build environment reported success but produced no artifact {}",
                artifact.name
            )));
        }
    };
    if bytes == 0 {
        return Err(LayerError::BuildFailure(format!(
            "build environment produced an empty artifact {}",
            artifact.name
        )));
    }

    std::fs::rename(partial, &artifact.path).map_err(|e| {
        LayerError::io(
            format!("moving artifact into {}", artifact.path.display()),
            e,
        )
    })?;
    Ok(bytes)
}

fn discard(partial: &Path) {
    if let Err(e) = std::fs::remove_file(partial)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        error!("Failed to remove partial artifact {}: {}", partial.display(), e);
    }
}
