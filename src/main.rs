//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner crawl engine.

use anyhow::Context;
use clap::Parser;
use gleaner::config::{load_config_with_hash, Config};
use gleaner::output::{print_report, write_markdown_report};
use gleaner::url::normalize_url;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Gleaner: an adaptive, browser-backed crawler
///
/// Gleaner fetches pages through a headless browser, prioritizes links by
/// how likely they are to carry content, backs off when a site pushes back,
/// and stops on its own once a site is clearly blocking it.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "An adaptive, browser-backed crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Seed URLs (overrides the seeds in the configuration)
    #[arg(value_name = "URLS")]
    urls: Vec<String>,

    /// Read additional seed URLs from a file, one per line
    #[arg(long, value_name = "FILE")]
    urls_file: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume an interrupted crawl (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, discarding any checkpoint
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let mut urls = cli.urls.clone();
    if let Some(path) = &cli.urls_file {
        urls.extend(read_urls_file(path)?);
    }

    if cli.dry_run {
        handle_dry_run(&config, &urls);
        return Ok(());
    }

    let exit_code = handle_crawl(config, config_hash, urls, !cli.fresh).await?;
    std::process::exit(exit_code);
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gleaner=info,warn"),
            1 => EnvFilter::new("gleaner=debug,info"),
            2 => EnvFilter::new("gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Reads seed URLs from a file, skipping blank lines and `#` comments
fn read_urls_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, urls: &[String]) {
    println!("=== Gleaner Dry Run ===\n");

    let budget = &config.budget;
    println!("Budget:");
    println!("  Max pages: {}", budget.max_pages);
    println!("  Max depth: {}", budget.max_depth);
    println!("  Max retries: {}", budget.max_retries);
    println!("  Workers: {}", budget.workers);
    println!("  Base delay: {}ms", budget.base_delay_ms);
    println!("  Retry delay: {}ms", budget.retry_delay_ms);
    println!("  Page timeout: {}ms", budget.page_timeout_ms);

    let thresholds = &budget.stop_thresholds;
    println!(
        "  Stop thresholds: bot={} rate={} network={} total={}",
        thresholds.bot_detection, thresholds.rate_limit, thresholds.network, thresholds.total
    );

    println!("\nBrowser:");
    match &config.browser.executable {
        Some(path) => println!("  Executable: {}", path.display()),
        None => println!("  Executable: (auto-detect)"),
    }
    println!("  Headless: {}", config.browser.headless);
    println!("  Debug port: {}", config.browser.debug_port);
    println!("  Fetch mode: {:?}", config.browser.fetch_mode);
    if let Some(proxy) = &config.proxy {
        println!("  Proxy: {}", proxy.server);
    }
    println!("  Stealth profiles: {}", config.stealth.len());

    println!("\nCheckpoint:");
    if config.checkpoint.enabled {
        println!("  Path: {}", config.checkpoint.path);
    } else {
        println!("  Disabled");
    }

    let seeds = if urls.is_empty() { &config.seeds[..] } else { urls };
    println!("\nSeeds ({}):", seeds.len());
    for seed in seeds {
        match normalize_url(seed) {
            Ok(url) => println!("  - {}", url),
            Err(e) => println!("  - {} (invalid: {})", seed, e),
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation; returns the process exit code
async fn handle_crawl(
    config: Config,
    config_hash: String,
    urls: Vec<String>,
    resume: bool,
) -> anyhow::Result<i32> {
    if resume {
        tracing::info!("Starting crawl (will resume if a checkpoint exists)");
    } else {
        tracing::info!("Starting fresh crawl (discarding any checkpoint)");
    }

    let report_path = config.output.report_path.clone();
    let report = gleaner::run(config, config_hash, urls, resume)
        .await
        .context("Crawl failed")?;

    print_report(&report);

    if let Some(path) = report_path {
        write_markdown_report(&report, Path::new(&path))
            .with_context(|| format!("Failed to write report to {}", path))?;
        println!("✓ Report written to: {}", path);
    }

    Ok(report.exit_code())
}
