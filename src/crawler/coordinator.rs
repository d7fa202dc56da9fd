//! Crawler coordinator - runs a crawl with a pool of workers
//!
//! Each worker loops independently:
//! - Dequeue the next entry from the shared scheduler
//! - Wait the randomized pacing delay (and any retry backoff)
//! - Acquire a page session and fetch
//! - Record the result and checkpoint terminal URLs
//!
//! A fetch only suspends its own worker. The scheduler lock is never held
//! across an await.

use crate::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::config::{validate_budget, Config, CrawlBudget};
use crate::crawler::fetcher::PageFetcher;
use crate::crawler::frontier::FrontierEntry;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::retry::backoff_delay;
use crate::crawler::scheduler::{CrawlScheduler, RecordOutcome};
use crate::output::RunReport;
use crate::session::{SessionError, SessionPool};
use crate::state::RunState;
use crate::GleanerError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;

/// How long an idle worker waits before polling the scheduler again
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Page creations that may fail back to back, across all workers, before the
/// run fails
pub const MAX_CONSECUTIVE_CREATION_FAILURES: u32 = 5;

type SharedStore = Arc<Mutex<Box<dyn CheckpointStore>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: Arc<str>,
    pool: Arc<SessionPool>,
    fetcher: Arc<dyn PageFetcher>,
    checkpoint: Option<SharedStore>,
    cancel: Arc<AtomicBool>,
}

impl Coordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash stored alongside checkpoints
    /// * `pool` - Session pool pages are acquired from; launched on demand
    /// * `fetcher` - Performs the actual fetch for each page session
    pub fn new(
        config: Config,
        config_hash: impl Into<String>,
        pool: Arc<SessionPool>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            config_hash: Arc::from(config_hash.into()),
            pool,
            fetcher,
            checkpoint: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Saves progress to `store` and resumes from it
    ///
    /// # Arguments
    ///
    /// * `store` - Where the checkpoint lives; without one, runs never resume
    pub fn with_checkpoint_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(Arc::new(Mutex::new(store)));
        self
    }

    /// Flag that stops further dequeues once set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Crawls `urls` (or the configured seeds when empty) under `budget`
    ///
    /// With `resume`, a stored checkpoint is restored first and every URL it
    /// lists as finished is skipped. Without it, any stored checkpoint is
    /// discarded.
    ///
    /// # Errors
    ///
    /// Only configuration problems are returned as errors; they are detected
    /// before any fetch. Everything that happens during the run ends up in the
    /// report.
    pub async fn run(
        &self,
        urls: Vec<String>,
        budget: CrawlBudget,
        resume: bool,
    ) -> Result<RunReport, GleanerError> {
        validate_budget(&budget)?;
        let started_at = Utc::now();

        let mut config = (*self.config).clone();
        config.budget = budget.clone();
        let mut scheduler = CrawlScheduler::from_config(&config)?;

        let resumed = self.prepare_checkpoint(&mut scheduler, resume);

        let seeds = if urls.is_empty() { config.seeds.clone() } else { urls };
        let admitted = scheduler.enqueue_seed(&seeds);
        tracing::info!(
            "Starting crawl: {} of {} seeds queued, {} entries in frontier",
            admitted,
            seeds.len(),
            scheduler.frontier_len()
        );

        scheduler.start()?;

        if scheduler.frontier_len() > 0 && self.pool.check_health().await == 0 {
            if let Err(e) = self.pool.launch(&config.browser).await {
                scheduler.fail(format!("browser launch failed: {}", e))?;
                return Ok(build_report(&scheduler, started_at, resumed));
            }
        }

        let scheduler = Arc::new(Mutex::new(scheduler));
        let creation_failures = Arc::new(AtomicU32::new(0));
        let mut workers = JoinSet::new();

        for id in 0..budget.workers.max(1) {
            let worker = Worker {
                id,
                scheduler: Arc::clone(&scheduler),
                pool: Arc::clone(&self.pool),
                fetcher: Arc::clone(&self.fetcher),
                checkpoint: self.checkpoint.clone(),
                cancel: Arc::clone(&self.cancel),
                limiter: RateLimiter::new(budget.base_delay()),
                retry_delay: budget.retry_delay(),
                creation_failures: Arc::clone(&creation_failures),
                config_hash: Arc::clone(&self.config_hash),
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        let mut scheduler = lock(&scheduler);
        let state = scheduler.finish();

        if let Some(store) = &self.checkpoint {
            let mut store = lock(store);
            let result = if state == RunState::Completed {
                store.clear()
            } else {
                store.save(&scheduler.checkpoint_record(), &self.config_hash)
            };
            if let Err(e) = result {
                tracing::warn!("Failed to finalize checkpoint: {}", e);
            }
        }

        let report = build_report(&scheduler, started_at, resumed);
        tracing::info!(
            "Crawl {}: {} fetched, {} failed, {} unprocessed in {:.1}s",
            report.state,
            report.stats.pages_fetched,
            report.stats.pages_failed,
            report.unprocessed.len(),
            report.duration().as_secs_f64()
        );

        Ok(report)
    }

    /// Restores or discards the stored checkpoint; returns true if restored
    fn prepare_checkpoint(&self, scheduler: &mut CrawlScheduler, resume: bool) -> bool {
        let Some(store) = &self.checkpoint else {
            return false;
        };
        let mut store = lock(store);

        if !resume {
            if let Err(e) = store.clear() {
                tracing::warn!("Failed to clear previous checkpoint: {}", e);
            }
            return false;
        }

        match store.load() {
            Ok(Some(stored)) => {
                if stored.config_hash != *self.config_hash {
                    tracing::warn!(
                        "Checkpoint was written under a different configuration; resuming anyway"
                    );
                }
                tracing::info!("Resuming from checkpoint saved at {}", stored.saved_at);
                scheduler.restore(stored.record);
                true
            }
            Ok(None) => {
                tracing::info!("No checkpoint found, starting fresh");
                false
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable checkpoint ({}); starting fresh", e);
                if let Err(e) = store.clear() {
                    tracing::warn!("Failed to clear unreadable checkpoint: {}", e);
                }
                false
            }
        }
    }
}

fn build_report(scheduler: &CrawlScheduler, started_at: DateTime<Utc>, resumed: bool) -> RunReport {
    RunReport {
        state: scheduler.state(),
        stop_reason: scheduler.stop_reason(),
        interrupted: scheduler.was_interrupted(),
        failure: scheduler.failure().map(str::to_string),
        resumed,
        started_at,
        finished_at: Utc::now(),
        outcomes: scheduler.outcomes().to_vec(),
        errors: scheduler.error_counters(),
        stats: scheduler.stats(),
        unprocessed: scheduler.unprocessed(),
    }
}

struct Worker {
    id: u32,
    scheduler: Arc<Mutex<CrawlScheduler>>,
    pool: Arc<SessionPool>,
    fetcher: Arc<dyn PageFetcher>,
    checkpoint: Option<SharedStore>,
    cancel: Arc<AtomicBool>,
    limiter: RateLimiter,
    retry_delay: Duration,
    /// Back-to-back page creation failures, shared by all workers
    creation_failures: Arc<AtomicU32>,
    config_hash: Arc<str>,
}

impl Worker {
    async fn run(self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            let next = {
                let mut scheduler = lock(&self.scheduler);
                if self.cancel.load(Ordering::SeqCst) {
                    scheduler.interrupt();
                }
                if scheduler.is_finished() {
                    break;
                }
                scheduler.next()
            };

            let Some(entry) = next else {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };

            self.limiter.wait().await;
            if let Some(delay) = entry.retry_delay {
                tokio::time::sleep(delay).await;
            }

            let session = match self.pool.acquire_page(None, None, None).await {
                Ok(session) => {
                    self.creation_failures.store(0, Ordering::SeqCst);
                    session
                }
                Err(e) => {
                    if self.session_unavailable(entry, e).await {
                        break;
                    }
                    continue;
                }
            };

            self.pool.before_navigate(&session, &entry.url);
            let result = self.fetcher.fetch(&session, &entry.url).await;
            self.pool.after_navigate(&session, &entry.url, result.is_ok());

            if let Err(e) = self.pool.release_page(session).await {
                tracing::warn!("Failed to release page for {}: {}", entry.url, e);
            }

            let snapshot = {
                let mut scheduler = lock(&self.scheduler);
                let outcome = scheduler.record_result(entry, result);
                checkpoint_due(&outcome).then(|| scheduler.checkpoint_record())
            };
            self.save_checkpoint(snapshot);
        }

        tracing::debug!("Worker {} finished", self.id);
    }

    /// Handles a failed page acquisition; returns true if the run is over
    ///
    /// The entry goes back to the frontier uncounted: a page that could not be
    /// created says nothing about the site. The worker backs off before the
    /// next dequeue. The run fails once no healthy browser remains, or once
    /// page creation has failed [`MAX_CONSECUTIVE_CREATION_FAILURES`] times in
    /// a row.
    async fn session_unavailable(&self, entry: FrontierEntry, error: SessionError) -> bool {
        let healthy = if matches!(error, SessionError::NoHealthyBrowser) {
            0
        } else {
            self.pool.check_health().await
        };
        let failures = self.creation_failures.fetch_add(1, Ordering::SeqCst) + 1;

        let reason = if healthy == 0 {
            Some(format!("no healthy browser remains: {}", error))
        } else if failures >= MAX_CONSECUTIVE_CREATION_FAILURES {
            Some(format!(
                "page creation failed {} times in a row: {}",
                failures, error
            ))
        } else {
            None
        };

        let snapshot = {
            let mut scheduler = lock(&self.scheduler);
            scheduler.abandon(entry.clone());

            match &reason {
                Some(reason) if scheduler.state() == RunState::Running => {
                    if let Err(e) = scheduler.fail(reason.clone()) {
                        tracing::debug!("Could not mark run failed: {}", e);
                    }
                    Some(scheduler.checkpoint_record())
                }
                _ => None,
            }
        };
        self.save_checkpoint(snapshot);

        if reason.is_some() {
            return true;
        }

        let delay = backoff_delay(self.retry_delay, failures - 1);
        tracing::warn!(
            "Session creation failed for {} ({} in a row): {}; retrying in {:?}",
            entry.url,
            failures,
            error,
            delay
        );
        tokio::time::sleep(delay).await;
        false
    }

    fn save_checkpoint(&self, snapshot: Option<CheckpointRecord>) {
        if let (Some(record), Some(store)) = (snapshot, &self.checkpoint) {
            if let Err(e) = lock(store).save(&record, &self.config_hash) {
                tracing::warn!("Checkpoint save failed: {}", e);
            }
        }
    }
}

/// A checkpoint is written whenever a URL finishes or the run stops
fn checkpoint_due(outcome: &RecordOutcome) -> bool {
    outcome.terminal || outcome.stopped.is_some()
}
