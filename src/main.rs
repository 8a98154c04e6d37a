use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use miette::{Context, IntoDiagnostic, Result};

use lsmkv::api::StorageEngine;

#[derive(Parser, Debug)]
#[command(name = "lsmkv", version, about, long_about = None)]
struct Cli {
    /// Path to the data directory (defaults to $HOME/.lsmkv)
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert a key-value pair
    #[command(alias = "p")]
    Put { key: String, value: String },

    /// Get a value by key
    #[command(alias = "g")]
    Get { key: String },

    /// Update a value by key (an overwrite; same as `put`)
    #[command(alias = "u")]
    Update { key: String, value: String },

    /// Remove a key (writes a tombstone)
    #[command(alias = "rm")]
    Remove { key: String },

    /// Delete every segment and reset the WAL
    Clear,

    /// Merge the two newest segments repeatedly until one remains
    Compact,

    /// Freeze the live memtable into a new segment
    Flush,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let dir = cli.dir.unwrap_or_else(default_data_dir);

    let engine = StorageEngine::open(&dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("could not open store at {}", dir.display()))?;

    match cli.command {
        Command::Put { key, value } => {
            engine
                .set(key.as_bytes(), value.as_bytes())
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to put key={key}"))?;
            success(&format!("put: {key} = {value}"));
        }
        Command::Get { key } => {
            let value = engine.get(key.as_bytes());
            if value.is_empty() {
                warn(&format!("key not found: {key}"));
            } else {
                info(&format!("{key} = {}", String::from_utf8_lossy(&value)));
            }
        }
        Command::Update { key, value } => {
            engine
                .set(key.as_bytes(), value.as_bytes())
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to update key={key}"))?;
            success(&format!("update: {key} = {value}"));
        }
        Command::Remove { key } => {
            engine
                .delete(key.as_bytes())
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to remove key={key}"))?;
            success(&format!("removed: {key}"));
        }
        Command::Clear => {
            engine
                .clear()
                .into_diagnostic()
                .wrap_err("failed to clear store")?;
            success("store is cleared");
        }
        Command::Compact => {
            engine
                .compact()
                .into_diagnostic()
                .wrap_err("failed to compact store")?;
            success("compaction complete");
        }
        Command::Flush => {
            engine
                .flush()
                .into_diagnostic()
                .wrap_err("failed to flush store")?;
            success("flush complete");
        }
    }

    Ok(())
}

/// Resolves the default data directory, `$HOME/.lsmkv`.
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".lsmkv"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn success(msg: &str) {
    println!("{} {}", "✔".bright_green().bold(), msg.normal());
}

fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".bright_yellow().bold(), msg.yellow());
}

fn info(msg: &str) {
    println!("{} {}", "➤".bright_cyan().bold(), msg.cyan());
}
