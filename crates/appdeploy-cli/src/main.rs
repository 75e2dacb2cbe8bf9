mod commands;

use std::process::ExitCode;

use appdeploy_cloud::PipelineError;
use clap::{Parser, Subcommand};

/// Exit status for invalid flag values and combinations.
const USAGE_EXIT: u8 = 2;

#[derive(Parser)]
#[command(
    name = "appdeploy",
    about = "Build container images with Cloud Build and deploy them"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from SOURCE and optionally deploy it to a cluster
    Deploy(commands::DeployArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Deploy(args) => commands::deploy(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    let usage = err.chain().any(|cause| {
        cause
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_usage)
            || cause
                .downcast_ref::<appdeploy_core::Error>()
                .is_some_and(appdeploy_core::Error::is_usage)
    });
    if usage {
        ExitCode::from(USAGE_EXIT)
    } else {
        ExitCode::FAILURE
    }
}
