//! data-guard - single entrypoint for the Guardian backup orchestrator
//!
//! Runs the HTTP API with the backup scheduler, or performs one-shot backup
//! and restore runs straight from the command line.

mod commands;

use clap::{Parser, Subcommand};
use commands::{BackupCommand, CronCommand, RestoreCommand, ServeCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GUARDIAN_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "GUARDIAN_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server and the backup scheduler
    Serve(ServeCommand),
    /// Run a single backup of a database
    Backup(BackupCommand),
    /// Restore a backup artifact onto a database
    Restore(RestoreCommand),
    /// Show the upcoming fire times of a cron expression
    Cron(CronCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes full control when set
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::try_from_default_env()?,
        Err(_) => tracing_subscriber::EnvFilter::try_new(format!(
            "guardian_cli={level},\
             guardian_core={level},\
             guardian_backup={level},\
             aws_config=warn,\
             aws_smithy_runtime=warn,\
             h2=warn,\
             tower=warn,\
             hyper=warn",
            level = cli.log_level
        ))?,
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
        Commands::Backup(backup_cmd) => backup_cmd.execute(),
        Commands::Restore(restore_cmd) => restore_cmd.execute(),
        Commands::Cron(cron_cmd) => cron_cmd.execute(),
    }
}
