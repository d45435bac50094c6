//! irpack CLI
//!
//! Command-line tools for irpack buffers and objects.
//!
//! # Commands
//!
//! - `ingest` - Buffer newline-delimited JSON records and upload streams
//! - `recover` - Recover streams left in a disk buffer
//! - `inspect` - List bin and stack files of a disk buffer
//! - `decode` - Print the events of an uploaded object

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// irpack log buffering tools.
#[derive(Parser)]
#[command(name = "irpack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the output configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Buffer records from a newline-delimited JSON file
    Ingest {
        /// Tag to buffer the records under
        #[arg(short, long)]
        tag: String,

        /// Input file (`-` for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Directory receiving uploaded objects
        #[arg(short, long)]
        out: PathBuf,

        /// Records per flush
        #[arg(short, long, default_value = "256")]
        batch: usize,
    },

    /// Recover streams left in the disk buffer and upload them
    Recover {
        /// Directory receiving uploaded objects
        #[arg(short, long)]
        out: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List bin and stack files of the disk buffer
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the events of an uploaded object
    Decode {
        /// Object file (`.clp.zst`)
        #[arg(short, long)]
        input: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ingest {
            tag,
            input,
            out,
            batch,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::ingest::run(config, &tag, &input, &out, batch)?;
        }
        Commands::Recover { out, format } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::recover::run(config, &out, &format)?;
        }
        Commands::Inspect { format } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::inspect::run(&config.disk_buffer_path, &format)?;
        }
        Commands::Decode { input, format } => {
            commands::decode::run(&input, &format)?;
        }
        Commands::Version => {
            println!("irpack CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("IR format v{}", irpack_codec::FORMAT_VERSION);
        }
    }

    Ok(())
}
