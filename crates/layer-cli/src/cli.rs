use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "layer")]
#[command(about = "Build, size-check and publish serverless dependency layers", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a layer.toml (default: nearest layer.toml, then the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Values that override the configuration file
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Destination bucket
    #[arg(long, env = "LAYER_BUCKET", global = true)]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "LAYER_PREFIX", global = true)]
    pub prefix: Option<String>,

    /// Directory the artifact is written to and read from
    #[arg(long, env = "LAYER_ARTIFACT_DIR", global = true)]
    pub artifact_dir: Option<PathBuf>,

    /// Decompressed-size ceiling in bytes
    #[arg(long, env = "LAYER_CEILING_BYTES", global = true)]
    pub ceiling_bytes: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter layer.toml in the current directory
    Init {
        /// Dependencies to install into the layer
        #[arg(long = "dependency", short = 'd')]
        dependencies: Vec<String>,
    },

    /// Build the layer artifact in a disposable environment
    Build,

    /// Check the artifact against the size ceiling
    CheckSize {
        /// Artifact to check (default: from config)
        artifact: Option<PathBuf>,
    },

    /// Check the artifact and upload it if it fits
    Push {
        /// Artifact to publish (default: from config)
        artifact: Option<PathBuf>,
    },

    /// Build, check and publish
    Run,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}
