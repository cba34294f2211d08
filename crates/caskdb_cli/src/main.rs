//! CaskDB CLI
//!
//! Command-line tools for CaskDB storage directories.
//!
//! # Commands
//!
//! - `inspect` - Display segment statistics
//! - `verify` - Check every segment for torn tails and corruption
//! - `compact` - Run a merge pass to reclaim space
//! - `dump` - Print the records of one segment
//! - `get` / `set` / `delete` - Manual key access

mod commands;

use clap::{Parser, Subcommand};
use commands::CliError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CaskDB command-line storage tools.
#[derive(Parser)]
#[command(name = "caskdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Treat a single zero byte value as a deletion marker
    #[arg(global = true, long)]
    zero_byte_tombstones: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display segment statistics
    Inspect {
        /// Show per-segment details
        #[arg(short, long)]
        segments: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify segment integrity
    Verify,

    /// Merge old segments to reclaim space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Dump the records of one segment
    Dump {
        /// Segment id
        segment: u64,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the value of a key
    Get {
        /// Key to read
        key: String,
    },

    /// Store a value under a key
    Set {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,
    },

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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let encoding = if cli.zero_byte_tombstones {
        caskdb_core::TombstoneEncoding::ZeroByte
    } else {
        caskdb_core::TombstoneEncoding::Flag
    };

    match cli.command {
        Commands::Inspect { segments, format } => {
            let path = cli.path.ok_or(CliError::MissingPath("inspect"))?;
            commands::inspect::run(&path, segments, &format, encoding)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or(CliError::MissingPath("verify"))?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or(CliError::MissingPath("compact"))?;
            commands::compact::run(&path, dry_run, encoding)?;
        }
        Commands::Dump {
            segment,
            limit,
            format,
        } => {
            let path = cli.path.ok_or(CliError::MissingPath("dump"))?;
            commands::dump::run(&path, segment, limit, &format, encoding)?;
        }
        Commands::Get { key } => {
            let path = cli.path.ok_or(CliError::MissingPath("get"))?;
            commands::kv::get(&path, &key, encoding)?;
        }
        Commands::Set { key, value } => {
            let path = cli.path.ok_or(CliError::MissingPath("set"))?;
            commands::kv::set(&path, &key, &value, encoding)?;
        }
        Commands::Delete { key } => {
            let path = cli.path.ok_or(CliError::MissingPath("delete"))?;
            commands::kv::delete(&path, &key, encoding)?;
        }
        Commands::Version => {
            println!("CaskDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CaskDB Core v{}", caskdb_core::VERSION);
        }
    }

    Ok(())
}
