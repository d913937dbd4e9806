//! Courier CLI
//!
//! Command-line tools for Courier sync state.
//!
//! # Commands
//!
//! - `replay` - Run a notification dump through the sync engine
//! - `inspect` - Display the contents of a metadata store
//! - `hotfix` - Apply or list hotfix patches against a metadata store
//! - `version-compare` - Compare two client versions
//! - `call-states` - Print the voice channel state table

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Courier sync engine tools.
#[derive(Parser)]
#[command(name = "courier")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a notification dump through the sync engine
    Replay {
        /// JSON file with a notification page or an array of notifications
        file: PathBuf,

        /// Deliver the notifications over the push channel instead of as a
        /// missed-events download
        #[arg(short, long)]
        live: bool,
    },

    /// Display the contents of a metadata store
    Inspect {
        /// Metadata store directory
        store: PathBuf,
    },

    /// Apply hotfix patches against a metadata store
    Hotfix {
        /// Metadata store directory
        store: PathBuf,

        /// Version of the running client
        #[arg(short, long)]
        current: String,

        /// Apply the after-sync patches instead of the startup patches
        #[arg(short, long)]
        after_sync: bool,

        /// Bypass every patch and leave the markers untouched
        #[arg(short, long)]
        skip: bool,

        /// Only list the built-in patches
        #[arg(short, long)]
        list: bool,
    },

    /// Compare two client versions
    VersionCompare {
        /// First version
        a: String,
        /// Second version
        b: String,
    },

    /// Print the voice channel state for every signal combination
    CallStates,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = cli.format.as_str();
    match cli.command {
        Commands::Replay { file, live } => {
            commands::replay::run(&file, live, format)?;
        }
        Commands::Inspect { store } => {
            commands::inspect::run(&store, format)?;
        }
        Commands::Hotfix {
            store,
            current,
            after_sync,
            skip,
            list,
        } => {
            if list {
                commands::hotfix::list(format)?;
            } else {
                commands::hotfix::run(&store, &current, after_sync, skip, format)?;
            }
        }
        Commands::VersionCompare { a, b } => {
            commands::version_compare::run(&a, &b, format)?;
        }
        Commands::CallStates => {
            commands::call_states::run(format)?;
        }
        Commands::Version => {
            println!("Courier CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
