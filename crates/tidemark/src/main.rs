use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
use commands::offsets::{handle_offsets_command, OffsetsCommands};
use commands::{check, import, process};

/// Measurement alignment and QC assembly for instrument datasets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import raw sensor values (JSON array) into a dataset
    Import(import::ImportArgs),
    /// Run QC and measurement assembly over a dataset
    Process(process::ProcessArgs),
    /// Validate an instrument manifest and print its layout
    Check(check::CheckArgs),
    /// Inspect or edit sensor group clock offsets
    Offsets {
        #[command(subcommand)]
        command: OffsetsCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Import(args) => import::handle_import(args),
        Command::Process(args) => process::handle_process(args).await,
        Command::Check(args) => check::handle_check(args),
        Command::Offsets { command } => handle_offsets_command(command),
    }
}
