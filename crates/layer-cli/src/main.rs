mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use layer_config::Config;
use layer_core::{Cancellation, LayerError};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::Context;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable with --json
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if is_retryable(&err) {
                eprintln!("  The artifact is unchanged; it is safe to retry 'layer push'.");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { dependencies } => return commands::init::handle(dependencies),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "layer", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let (mut config, config_path) = Config::load(cli.config.as_deref())?;
    match &config_path {
        Some(path) => debug!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }
    commands::apply_overrides(&mut config, cli.overrides);

    let (handle, cancel) = Cancellation::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up");
            handle.cancel();
        }
    });

    let mut ctx = Context {
        config,
        cancel,
        json: cli.json,
    };

    match cli.command {
        Commands::Build => commands::build::handle(&ctx).await,
        Commands::CheckSize { artifact } => {
            ctx.use_artifact(artifact.as_deref())?;
            commands::check::handle(&ctx).await
        }
        Commands::Push { artifact } => {
            ctx.use_artifact(artifact.as_deref())?;
            commands::push::handle(&ctx).await
        }
        Commands::Run => commands::run::handle(&ctx).await,
        Commands::Init { .. } | Commands::Completions { .. } => Ok(()),
    }
}

/// Pipeline errors carry their own exit code; anything else is 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LayerError>()
        .map(LayerError::exit_code)
        .unwrap_or(1)
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<LayerError>()
        .is_some_and(LayerError::is_retryable)
}
