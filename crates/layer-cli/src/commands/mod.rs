pub mod build;
pub mod check;
pub mod init;
pub mod push;
pub mod run;

use anyhow::Result;
use layer_config::Config;
use layer_core::Cancellation;
use layer_engine::PipelineOutcome;
use std::path::{Path, PathBuf};

use crate::cli::Overrides;

/// Everything a command needs after configuration is resolved
pub struct Context {
    pub config: Config,
    pub cancel: Cancellation,
    pub json: bool,
}

impl Context {
    /// Point the config at an explicitly given artifact file.
    pub fn use_artifact(&mut self, path: Option<&Path>) -> Result<()> {
        let Some(path) = path else {
            return Ok(());
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("invalid artifact path: {}", path.display()))?;

        self.config.artifact.name = name.to_string();
        self.config.artifact.dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(())
    }
}

/// Apply flag and environment overrides on top of the loaded file.
pub fn apply_overrides(config: &mut Config, overrides: Overrides) {
    if let Some(bucket) = overrides.bucket {
        config.publish.bucket = Some(bucket);
    }
    if let Some(prefix) = overrides.prefix {
        config.publish.prefix = prefix;
    }
    if let Some(dir) = overrides.artifact_dir {
        config.artifact.dir = dir;
    }
    if let Some(ceiling) = overrides.ceiling_bytes {
        config.size.ceiling_bytes = ceiling;
    }
}

/// Print the outcome, as JSON when requested.
pub fn report(ctx: &Context, outcome: &PipelineOutcome) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if let Some(build) = &outcome.build {
        println!(
            "✓ Built {} ({}, {:.1}s)",
            build.artifact.path.display(),
            layer_core::format_mib(build.bytes),
            build.duration.as_secs_f64()
        );
    }
    if let Some(report) = &outcome.report
        && report.passed()
    {
        println!("✓ {}", report.summary());
    }
    if let Some(receipt) = &outcome.receipt {
        println!("✓ Published {} (blake3 {})", receipt.address, receipt.blake3);
    }
    Ok(())
}
