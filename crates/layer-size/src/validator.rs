use layer_config::Config;
use layer_core::{
    Artifact, Cancellation, LayerError, Result, SizeMethod, SizeReport, Stage, ValidatedArtifact,
    bounded,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::archive::{self, ArchiveFormat};

/// Decides whether an artifact fits under the decompressed-size ceiling
#[derive(Debug, Clone)]
pub struct SizeValidator {
    ceiling: u64,
    method: SizeMethod,
    timeout: Duration,
    scratch_root: Option<PathBuf>,
}

/// Sets the abort flag when the measuring future goes away, so the
/// blocking worker stops at the next entry.
struct AbortOnDrop(Arc<AtomicBool>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl SizeValidator {
    pub fn new(ceiling: u64, timeout: Duration) -> Self {
        Self {
            ceiling,
            method: SizeMethod::Extract,
            timeout,
            scratch_root: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            ceiling: config.size.ceiling_bytes,
            method: config.size.method,
            timeout: config.timeouts.size_check(),
            scratch_root: config.size.scratch_dir.clone(),
        }
    }

    pub fn with_method(mut self, method: SizeMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Measure both size dimensions. A failing verdict is still `Ok`.
    pub async fn measure(&self, artifact: &Artifact, cancel: &Cancellation) -> Result<SizeReport> {
        let compressed = artifact.ensure_present()?;
        let format = ArchiveFormat::detect(&artifact.path)?;

        let abort = Arc::new(AtomicBool::new(false));
        let _guard = AbortOnDrop(abort.clone());

        let path = artifact.path.clone();
        let method = self.method;
        let scratch_root = self.scratch_root.clone();
        let worker_abort = abort.clone();
        let mut worker = tokio::task::spawn_blocking(move || {
            measure_blocking(&path, format, method, scratch_root.as_deref(), &worker_abort)
        });

        let outcome = bounded(Stage::SizeCheck, self.timeout, cancel, async {
            match (&mut worker).await {
                Ok(result) => result,
                Err(e) => Err(LayerError::io(
                    "running size check worker",
                    std::io::Error::other(e.to_string()),
                )),
            }
        })
        .await;

        let (decompressed, entries) = match outcome {
            Ok(measured) => measured,
            Err(e @ (LayerError::Timeout { .. } | LayerError::Cancelled(_))) => {
                // Wait for the worker so its scratch directory is gone on return.
                abort.store(true, Ordering::Relaxed);
                let _ = worker.await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let report = SizeReport::new(
            &artifact.path,
            compressed,
            decompressed,
            self.ceiling,
            entries,
            self.method,
        );
        debug!(
            "Measured {}: compressed={} decompressed={} entries={} method={}",
            artifact.path.display(),
            compressed,
            decompressed,
            entries,
            self.method
        );
        Ok(report)
    }
}

/// Turn a measurement into a publishable artifact, or `OversizeArtifact`
/// when the verdict fails. Logs the verdict either way.
pub fn gate(artifact: Artifact, report: SizeReport) -> Result<ValidatedArtifact> {
    if report.passed() {
        info!("{}", report.summary());
    } else {
        warn!("{}", report.summary());
    }
    ValidatedArtifact::new(artifact, report)
}

fn measure_blocking(
    path: &Path,
    format: ArchiveFormat,
    method: SizeMethod,
    scratch_root: Option<&Path>,
    abort: &AtomicBool,
) -> Result<(u64, u64)> {
    match method {
        SizeMethod::Declared => archive::declared_size(path, format, abort),
        SizeMethod::Extract => {
            let scratch = create_scratch(scratch_root)?;
            let scratch_path = scratch.path().to_path_buf();
            debug!("Extracting {} into {}", path.display(), scratch_path.display());

            let result = archive::extract(path, format, &scratch_path, abort)
                .and_then(|()| archive::sum_tree(&scratch_path));

            if let Err(e) = scratch.close() {
                error!(
                    "Failed to remove scratch directory {}: {}",
                    scratch_path.display(),
                    e
                );
            }
            result
        }
    }
}

fn create_scratch(root: Option<&Path>) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("layer-size-");
    let scratch = match root {
        Some(root) => {
            std::fs::create_dir_all(root).map_err(|e| {
                LayerError::io(format!("creating scratch root {}", root.display()), e)
            })?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    };
    scratch.map_err(|e| LayerError::io("creating scratch directory", e))
}
