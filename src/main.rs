//! Seine main entry point

use clap::Parser;
use seine::api::HttpApiClient;
use seine::config::{load_config_with_hash, resolve_plan, Config};
use seine::store::{EntityType, FsStore, RecordStore};
use seine::verify::verify;
use seine::Pipeline;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Seine: a resumable social-graph harvester
///
/// Seine crawls a social graph behind a quota-limited API across declared
/// stages, persisting every fetched entity so interrupted runs resume
/// without refetching.
#[derive(Parser, Debug)]
#[command(name = "seine")]
#[command(version)]
#[command(about = "A resumable social-graph harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Clear the record store before running
    #[arg(long)]
    fresh: bool,

    /// Validate config and print the resolved stage plan without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show record store statistics and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_run(config, config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("seine=info,warn"),
            1 => EnvFilter::new("seine=debug,info"),
            2 => EnvFilter::new("seine=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn handle_run(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Fresh run requested, clearing store at {}", config.store.root);
        FsStore::open(&config.store.root)?.clear()?;
    }

    let client = Arc::new(HttpApiClient::new(&config.api)?);
    let mut pipeline = Pipeline::new(config, client, Some(config_hash))?;
    pipeline.run().await?;
    Ok(())
}

/// Validates the config and prints the resolved plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let plan = resolve_plan(config)?;

    println!("=== Seine Dry Run ===\n");
    println!("Upstream: {} (v{})", config.api.base_url, config.api.version);
    println!("Store root: {}", config.store.root);
    println!(
        "Workers: {} fetch, {} verify; {} stage retries",
        config.runner.fetch_workers, config.runner.verify_workers, config.runner.max_stage_retries
    );
    println!("Credentials: {} tokens", config.credentials.tokens.len());

    println!("\nStages ({}):", plan.len());
    for stage in &plan {
        let source = match &stage.decl.sample {
            Some(spec) => format!(
                "sample {} from '{}'{}{}",
                spec.count,
                spec.from,
                if spec.per_entity { " per entity" } else { "" },
                if spec.only_verified { ", verified only" } else { "" },
            ),
            None => format!("{} literal ids", stage.decl.ids.len()),
        };
        println!("  - {} ({}): {}", stage.decl.name, stage.decl.entity, source);
        for request in &stage.requests {
            println!(
                "      {} -> {}{}",
                request.alias,
                request.method,
                if request.paged { " (paged)" } else { "" }
            );
        }
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Prints per-type record counts from the store
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let store = FsStore::open(&config.store.root)?;

    println!("Store root: {}\n", config.store.root);
    for entity in [EntityType::User, EntityType::Group] {
        let ids = store.discover(entity)?;
        let mut verified = 0usize;
        for &id in &ids {
            if let Ok(record) = store.load(entity, id) {
                if verify(entity, &record, &config.verify) {
                    verified += 1;
                }
            }
        }
        println!("{}s: {} stored, {} verified", entity, ids.len(), verified);
    }
    Ok(())
}
