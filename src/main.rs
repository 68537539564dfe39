//! Binary entry point for blockcache.
//!
//! Inspects and maintains the alias index and block cache snapshots on disk.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use blockcache::config::Config;
use blockcache::observability;
use blockcache::storage::flush_all_now;
use blockcache::{AliasIndex, BlockCache, CacheKey, Flushable, ObjectKind};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

/// Blockcache - identifier aliasing and block caching for workspace agents.
#[derive(Parser)]
#[command(name = "blockcache")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show alias and cache statistics.
    Stats,

    /// Resolve an identifier, URL or alias.
    Resolve {
        /// Identifier, workspace URL or alias number.
        input: String,
    },

    /// List favorite documents.
    Favorites {
        /// Maximum number of entries.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List the most visited documents.
    Visited {
        /// Maximum number of entries.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Evict the oldest cache entries until the size budget is met.
    Evict,

    /// Drop a cached object and everything below it.
    Invalidate {
        /// Identifier, workspace URL or alias number.
        input: String,

        /// Object kind: page, database or block.
        #[arg(short, long, default_value = "page")]
        kind: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_settings(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let aliases = Arc::new(AliasIndex::open_with_timeout(
        Some(config.alias_db_path()),
        config.storage.lock_timeout(),
    )?);
    let cache = Arc::new(BlockCache::open_with_settings(
        Some(config.cache_db_path()),
        &config.storage,
    )?);

    match command {
        Commands::Stats => cmd_stats(config, &aliases, &cache),
        Commands::Resolve { input } => cmd_resolve(&aliases, &input),
        Commands::Favorites { limit } => cmd_favorites(&aliases, limit),
        Commands::Visited { limit } => cmd_visited(&aliases, limit),
        Commands::Evict => cmd_evict(&cache),
        Commands::Invalidate { input, kind } => cmd_invalidate(&aliases, &cache, &input, &kind),
    }?;

    let targets: Vec<Arc<dyn Flushable>> = vec![aliases as Arc<dyn Flushable>, cache];
    let failures = flush_all_now(&targets);
    if failures > 0 {
        return Err(format!("{failures} snapshot(s) failed to flush").into());
    }
    Ok(())
}

/// Loads configuration.
fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(config_path) = path {
        return Ok(Config::load_from_file(Path::new(config_path))?.with_env_overrides());
    }

    if let Ok(config_path) = std::env::var("BLOCKCACHE_CONFIG_PATH") {
        if !config_path.trim().is_empty() {
            return Ok(Config::load_from_file(Path::new(&config_path))?.with_env_overrides());
        }
    }

    Ok(Config::load_default().with_env_overrides())
}

/// Shows statistics.
fn cmd_stats(
    config: &Config,
    aliases: &AliasIndex,
    cache: &BlockCache,
) -> Result<(), Box<dyn std::error::Error>> {
    let metrics = cache.get_metrics();

    println!("Blockcache Status");
    println!("=================");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Data Directory: {}", config.data_dir.display());
    println!();
    println!("Aliases: {}", aliases.len());
    println!("Cache Entries: {}", cache.entry_count());
    println!(
        "Cache Size: {} / {} bytes",
        cache.size_bytes(),
        cache.max_size_bytes()
    );
    println!(
        "Session Lookups: {} hits, {} not found, {} expired",
        metrics.hits, metrics.misses_not_found, metrics.misses_expired
    );
    Ok(())
}

/// Resolves an identifier.
fn cmd_resolve(aliases: &AliasIndex, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = aliases.require_id(input)?;
    println!("Id: {}", id.to_hyphenated());
    println!("Compact: {}", id.to_compact());
    match aliases.get_alias(id) {
        Some(alias) => {
            let name = aliases.get_name(alias);
            println!("Alias: {alias}");
            if !name.is_empty() {
                println!("Name: {name}");
            }
        },
        None => println!("Alias: (not registered)"),
    }
    Ok(())
}

/// Lists favorites.
fn cmd_favorites(aliases: &AliasIndex, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let favorites = aliases.get_favorites_with_names(limit);
    if favorites.is_empty() {
        println!("No favorites.");
    }
    for record in favorites {
        println!(
            "{:>6}  {:>5}  {}  {}",
            record.alias.value(),
            record.visit_count,
            record.id,
            record.name
        );
    }
    Ok(())
}

/// Lists the most visited documents.
fn cmd_visited(aliases: &AliasIndex, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    for record in aliases.most_visited(limit) {
        println!(
            "{:>6}  {:>5}  {}  {}",
            record.alias.value(), record.visit_count, record.id, record.name
        );
    }
    Ok(())
}

/// Enforces the cache size budget.
fn cmd_evict(cache: &BlockCache) -> Result<(), Box<dyn std::error::Error>> {
    let before = cache.size_bytes();
    let evicted = cache.enforce_size_limit()?;
    println!(
        "Evicted {evicted} entries ({before} -> {} bytes)",
        cache.size_bytes()
    );
    Ok(())
}

/// Drops a cached object and its descendants.
fn cmd_invalidate(
    aliases: &AliasIndex,
    cache: &BlockCache,
    input: &str,
    kind: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = ObjectKind::parse(kind)
        .filter(|kind| !kind.is_listing())
        .ok_or_else(|| format!("unsupported kind '{kind}'"))?;
    let id = aliases.require_id(input)?;
    let removed = cache.delete_recursive(&CacheKey::document(id, kind))?;
    println!("Removed {removed} cache entries");
    Ok(())
}
