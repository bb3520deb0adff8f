use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stemforged_common::Stage;

#[derive(Parser)]
#[command(name = "stemforged")]
#[command(author, version, about = "Karaoke stem-separation pipeline")]
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
    /// Start the API server, the directory watcher and all stage workers
    Start {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run a single stage worker against the shared ledger
    Worker {
        /// metadata, separation or packaging
        stage: Stage,
    },

    /// Queue an audio file for processing
    Enqueue {
        /// Audio file to queue; it is copied, not moved
        #[arg(required = true)]
        file: PathBuf,

        /// Comma-separated stems to keep instead of the default selection
        #[arg(long)]
        stem_types: Option<String>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,

    /// Generate a bcrypt password hash
    HashPassword {
        /// Password to hash
        password: String,
    },

    /// Generate a random hex secret
    GenerateSecret,
}
