//! Strata CLI
//!
//! Maintenance tools for Strata storage directories.
//!
//! # Commands
//!
//! - `inspect` - Show databases, tables, segments and indexes
//! - `checkpoint` - Take a checkpoint and truncate the WAL
//! - `compact` - Merge the segments of a table
//! - `dump-wal` - Print WAL records for debugging
//! - `verify` - Check WAL checksums and recovery

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Strata storage tools.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show databases, tables, segments and indexes
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Take a checkpoint and truncate the WAL
    Checkpoint {
        /// Also reclaim versions no transaction can see
        #[arg(long)]
        full: bool,
    },

    /// Merge every live segment of a table into one
    Compact {
        /// Database name
        #[arg(long)]
        db: String,

        /// Table name
        #[arg(long)]
        table: String,
    },

    /// Print WAL records for debugging
    DumpWal {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check WAL checksums and that the storage recovers
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = || cli.path.clone().ok_or("storage path required (--path)");
    match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path()?, format)?,
        Commands::Checkpoint { full } => commands::checkpoint::run(&path()?, full)?,
        Commands::Compact { ref db, ref table } => commands::compact::run(&path()?, db, table)?,
        Commands::DumpWal { limit, format } => commands::dump_wal::run(&path()?, limit, format)?,
        Commands::Verify => commands::verify::run(&path()?)?,
        Commands::Version => {
            println!("Strata CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Strata Core v{}", strata_core::VERSION);
        }
    }

    Ok(())
}
