use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stillforged_common::TargetFormat;

#[derive(Parser)]
#[command(name = "stillforged")]
#[command(author, version, about = "Batch image conversion for object stores")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert every eligible image under a prefix
    Convert {
        /// Only convert keys starting with this prefix (overrides config)
        #[arg(long)]
        prefix: Option<String>,

        /// Encode but do not upload or record anything
        #[arg(long)]
        dry_run: bool,

        /// Maximum conversions in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// Encoder quality, 1-100
        #[arg(long)]
        quality: Option<u8>,

        /// Target format (webp, avif, jpeg)
        #[arg(long)]
        format: Option<TargetFormat>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what the conversion ledger holds
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Recover the journal and rewrite the primary ledger store
    Compact,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
