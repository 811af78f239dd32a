//! Sagekit CLI - Command-line interface for managed training and batch transform jobs
//!
//! This CLI provides a `skit` command for preparing workshop data locally and
//! driving SageMaker training and transform jobs through submit, wait and inspect.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{
    JobRefArgs, PackageArgs, RegisterModelArgs, SplitArgs, TrainArgs, TransformArgs, VerifyArgs, WaitArgs,
};
use commands::{data, jobs, train, transform};

/// Sagekit CLI - Submit, wait on and inspect managed ML jobs
#[derive(Parser, Debug)]
#[command(
    name = "skit",
    author,
    version,
    about = "Sagekit - managed training and batch transform from the command line",
    long_about = "Sagekit (skit) prepares batch inputs and model archives locally and drives SageMaker\ntraining and batch transform jobs: build a request, submit it, wait for a terminal status,\nthen read the results from S3."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Session config file (defaults to ./sagekit.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample a labeled table into batch input and label files
    ///
    /// Features go to `<out>/input/` (what the transform job reads) and the
    /// true labels to `<out>/labels/` for checking predictions afterwards.
    Split(SplitArgs),

    /// Archive a directory as tar.gz, skipping hidden files
    Package(PackageArgs),

    /// Check a downloaded prediction file against its labels
    Verify(VerifyArgs),

    /// Run a training job and print its model artifact
    Train(TrainArgs),

    /// Run a batch transform job and list its output files
    Transform(TransformArgs),

    /// Show the current status of a job
    Describe(JobRefArgs),

    /// Wait until a job reaches a terminal status
    Wait(WaitArgs),

    /// Register the model produced by a completed training job
    RegisterModel(RegisterModelArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Local commands never need a session config.
    let config_path = args.config.as_deref();
    match args.command {
        Command::Split(cmd) => data::split(cmd),
        Command::Package(cmd) => data::package(cmd),
        Command::Verify(cmd) => data::verify(cmd),
        Command::Train(cmd) => train::execute(config::load_config(config_path)?, cmd).await,
        Command::Transform(cmd) => transform::execute(config::load_config(config_path)?, cmd).await,
        Command::Describe(cmd) => jobs::describe(config::load_config(config_path)?, cmd).await,
        Command::Wait(cmd) => jobs::wait(config::load_config(config_path)?, cmd).await,
        Command::RegisterModel(cmd) => jobs::register_model(config::load_config(config_path)?, cmd).await,
    }
}
