//! Crawler module: scheduling, retries, pacing and fetching
//!
//! This module contains the core crawling logic, including:
//! - The priority frontier and the scheduler that owns it
//! - Error classification, retry backoff and adaptive stop
//! - Randomized pacing between dequeues
//! - Page fetching and link extraction
//! - Overall crawl coordination

mod browser_fetcher;
mod coordinator;
mod fetcher;
mod frontier;
mod parser;
mod rate_limiter;
mod retry;
mod scheduler;

pub use browser_fetcher::BrowserPageFetcher;
pub use coordinator::{Coordinator, MAX_CONSECUTIVE_CREATION_FAILURES};
pub use fetcher::{FetchError, FetchedPage, HttpPageFetcher, PageFetcher};
pub use frontier::{Frontier, FrontierEntry, Rejection};
pub use parser::{parse_page, ParsedPage};
pub use rate_limiter::{sample_delay, RateLimiter};
pub use retry::{
    backoff_delay, classify, ErrorCategory, ErrorCounters, ErrorRecord, RetryCoordinator,
    RetryDecision, StopReason, StopTrigger, RECENT_FAILURE_LIMIT, RETRY_JITTER,
};
pub use scheduler::{CrawlScheduler, RecordOutcome};

use crate::checkpoint::SqliteCheckpointStore;
use crate::config::{Config, FetchMode};
use crate::output::RunReport;
use crate::session::{discover_browser, BrowserDriver, ChromeDriver, LoggingObserver, SessionPool};
use crate::GleanerError;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Runs a complete crawl against a locally launched browser
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Locate the browser binary
/// 2. Build the session pool and the page fetcher for the configured fetch mode
/// 3. Open the checkpoint store (if enabled)
/// 4. Crawl until the frontier drains or the run stops
/// 5. Shut the browser down
///
/// Ctrl-C stops further dequeues; fetches in flight are allowed to finish
/// and the checkpoint is kept for a later `resume`.
///
/// # Arguments
///
/// * `config` - The validated configuration
/// * `config_hash` - Hash of the configuration file, stored with checkpoints
/// * `urls` - Seed URLs; the configured seeds are used when empty
/// * `resume` - Continue from the stored checkpoint instead of starting fresh
pub async fn run(
    mut config: Config,
    config_hash: String,
    urls: Vec<String>,
    resume: bool,
) -> Result<RunReport, GleanerError> {
    let executable = discover_browser(config.browser.executable.as_deref())?;
    tracing::info!("Using browser at {}", executable.display());
    config.browser.executable = Some(executable);

    let driver = Arc::new(ChromeDriver::new());
    let pool = Arc::new(
        SessionPool::new(Arc::clone(&driver) as Arc<dyn BrowserDriver>)
            .with_proxy(config.proxy.clone())
            .with_stealth_profiles(config.stealth.clone())
            .with_observer(Arc::new(LoggingObserver)),
    );

    let (page_timeout, settle_delay) = (config.budget.page_timeout(), config.budget.settle_delay());
    let fetcher: Arc<dyn PageFetcher> = match config.browser.fetch_mode {
        FetchMode::Browser => Arc::new(BrowserPageFetcher::new(driver, page_timeout, settle_delay)),
        FetchMode::Http => {
            tracing::info!("Fetching pages over plain HTTP; the browser only hosts sessions");
            Arc::new(HttpPageFetcher::new(page_timeout, settle_delay))
        }
    };

    let budget = config.budget.clone();
    let checkpoint = config.checkpoint.clone();
    let mut coordinator = Coordinator::new(config, config_hash, Arc::clone(&pool), fetcher);

    if checkpoint.enabled {
        let store = SqliteCheckpointStore::open(Path::new(&checkpoint.path))?;
        coordinator = coordinator.with_checkpoint_store(Box::new(store));
    }

    let cancel = coordinator.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight fetches");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let result = coordinator.run(urls, budget, resume).await;
    interrupt.abort();

    if let Err(e) = pool.shutdown().await {
        tracing::warn!("Browser shutdown failed: {}", e);
    }

    result
}
