//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Cardbox card compiler and realm indexer CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (default: cardbox.toml)
    #[arg(short = 'C', long, default_value = "cardbox.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile one card and its adoption chain into the cache
    #[command(visible_alias = "c")]
    Compile {
        /// Card URL to compile
        url: String,
    },

    /// Run a full indexing update over every configured realm
    #[command(visible_alias = "i")]
    Index {
        /// Print the operations without writing the index
        #[arg(long)]
        dry_run: bool,
    },

    /// Index all realms, then watch for changes until Ctrl+C
    #[command(visible_alias = "w")]
    Watch,
}
