//! Cardbox - a card compiler and incremental realm indexer.

#![allow(dead_code)]

mod card;
mod cli;
mod compiler;
mod config;
mod error;
mod index;
mod logger;
mod realm;
mod schema;
mod template;
mod track;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use cli::{Cli, Commands};
use config::BoxConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = BoxConfig::load(&cli.config)
        .with_context(|| format!("failed to load `{}`", cli.config.display()))?;

    match &cli.command {
        Commands::Compile { url } => cli::compile::run_compile(url, &config),
        Commands::Index { dry_run } => cli::index::run_index(*dry_run, &config),
        Commands::Watch => cli::watch::run_watch(&config),
    }
}
