//! Crawl scheduler: frontier, scoring, retries and adaptive stop
//!
//! The scheduler is the single owner of the frontier, the visited set and
//! the error counters. Workers never touch those directly; they call
//! [`CrawlScheduler::next`] and [`CrawlScheduler::record_result`] through a
//! shared lock.

use crate::checkpoint::CheckpointRecord;
use crate::config::{Config, CrawlBudget};
use crate::crawler::fetcher::{FetchError, FetchedPage};
use crate::crawler::frontier::{Frontier, FrontierEntry, Rejection};
use crate::crawler::retry::{ErrorCounters, RetryCoordinator, RetryDecision, StopReason};
use crate::output::{CrawlStats, UrlOutcome};
use crate::state::{EntryState, RunState};
use crate::url::{normalize_url, SiteScope, UrlFilter, UrlVerdict, NEUTRAL_SCORE};
use crate::{ConfigError, GleanerError};
use std::collections::{HashMap, HashSet};
use url::Url;

/// What recording a result changed
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// The URL reached `Done` or `Failed`
    pub terminal: bool,
    /// Newly admitted links
    pub enqueued: usize,
    /// Set when this result tripped an adaptive stop
    pub stopped: Option<StopReason>,
}

/// Owns the frontier and decides what is fetched next
pub struct CrawlScheduler {
    budget: CrawlBudget,
    filter: UrlFilter,
    scope: SiteScope,
    scope_to_seeds: bool,
    frontier: Frontier,
    retry: RetryCoordinator,
    entry_states: HashMap<String, EntryState>,
    in_flight: HashMap<String, FrontierEntry>,
    completed: Vec<String>,
    failed: Vec<String>,
    finished: HashSet<String>,
    outcomes: Vec<UrlOutcome>,
    stats: CrawlStats,
    state: RunState,
    stop_reason: Option<StopReason>,
    failure: Option<String>,
    interrupted: bool,
}

impl CrawlScheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `budget` - Per-run limits
    /// * `filter` - Deny/allow patterns used to score discovered links
    /// * `scope` - Domains discovered links must stay within
    /// * `scope_to_seeds` - Add each seed's domain to `scope`
    pub fn new(budget: CrawlBudget, filter: UrlFilter, scope: SiteScope, scope_to_seeds: bool) -> Self {
        let retry = RetryCoordinator::new(budget.stop_thresholds);
        let frontier = Frontier::new(budget.max_pages);

        Self {
            budget,
            filter,
            scope,
            scope_to_seeds,
            frontier,
            retry,
            entry_states: HashMap::new(),
            in_flight: HashMap::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            finished: HashSet::new(),
            outcomes: Vec::new(),
            stats: CrawlStats::default(),
            state: RunState::Idle,
            stop_reason: None,
            failure: None,
            interrupted: false,
        }
    }

    /// Creates a scheduler from a loaded configuration
    ///
    /// Explicit `allowed-domains` fix the scope; otherwise the scope follows
    /// the seeds when `same-site-only` is set.
    ///
    /// # Errors
    ///
    /// * `ConfigError` - A deny or allow pattern is not a valid regex
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let patterns = &config.patterns;
        let filter = UrlFilter::from_config(patterns.deny.as_deref(), patterns.allow.as_deref())?;

        let (scope, scope_to_seeds) = if !patterns.allowed_domains.is_empty() {
            (SiteScope::from_patterns(patterns.allowed_domains.iter().cloned()), false)
        } else {
            (SiteScope::unrestricted(), patterns.same_site_only)
        };

        Ok(Self::new(config.budget.clone(), filter, scope, scope_to_seeds))
    }

    // ===== Run state =====

    /// Current run state
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, to: RunState) -> Result<(), GleanerError> {
        if !self.state.can_transition_to(&to) {
            return Err(GleanerError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("Run state {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Moves the run from `Idle` to `Running`
    pub fn start(&mut self) -> Result<(), GleanerError> {
        self.transition(RunState::Running)
    }

    /// Ends a running run; a stopped or failed run keeps its state
    pub fn finish(&mut self) -> RunState {
        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }
        self.state
    }

    /// Ends the run as `Failed`
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), GleanerError> {
        let reason = reason.into();
        self.transition(RunState::Failed)?;
        tracing::error!("Run failed: {}", reason);
        self.failure = Some(reason);
        Ok(())
    }

    /// Stops a running run on external request; in-flight fetches still finish
    pub fn interrupt(&mut self) {
        if self.state == RunState::Running {
            tracing::warn!("Run interrupted; no further URLs will be dequeued");
            self.state = RunState::Stopped;
            self.interrupted = true;
        }
    }

    /// True if the run was stopped by `interrupt` rather than a threshold
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    /// The threshold that stopped the run, if one did
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Why the run failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// True once nothing more will be dequeued and nothing is in flight
    pub fn is_finished(&self) -> bool {
        self.in_flight.is_empty() && (self.state.is_terminal() || self.frontier.is_empty())
    }

    // ===== Frontier =====

    /// Adds seed URLs at depth 0 with neutral priority
    ///
    /// Seeds already finished in a restored run are skipped, as are seeds
    /// matching a deny pattern. Returns how many seeds were admitted.
    pub fn enqueue_seed<I, S>(&mut self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut admitted = 0;

        for raw in urls {
            let raw = raw.as_ref();
            let url = match normalize_url(raw) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!("Skipping invalid seed {}: {}", raw, e);
                    continue;
                }
            };

            if self.scope_to_seeds {
                self.scope.include_seed(&url);
            }

            if self.finished.contains(url.as_str()) {
                tracing::info!("Skipping seed {} (already finished)", url);
                continue;
            }

            if let Some(pattern) = self.filter.denied_by(&url) {
                tracing::warn!("Skipping seed {} (matches deny pattern {})", url, pattern);
                self.stats.links_denied += 1;
                continue;
            }

            match self.frontier.admit(url.clone(), 0, NEUTRAL_SCORE, None) {
                Ok(()) => {
                    self.entry_states.insert(url.to_string(), EntryState::Pending);
                    admitted += 1;
                }
                Err(Rejection::AlreadySeen) => {
                    tracing::debug!("Seed {} already queued", url);
                }
                Err(Rejection::OverBudget) => {
                    tracing::warn!("Seed {} not queued: page budget reached", url);
                    self.stats.links_over_budget += 1;
                }
            }
        }

        admitted
    }

    /// Scores a URL found at `depth`; denied URLs get no score
    pub fn score_url(&self, url: &Url, depth: u32) -> UrlVerdict {
        self.filter.score(url, depth)
    }

    /// Pops the highest-priority entry and marks it in flight
    ///
    /// Returns `None` once the run is no longer running or the frontier is
    /// empty.
    pub fn next(&mut self) -> Option<FrontierEntry> {
        if self.state != RunState::Running {
            return None;
        }

        while let Some(entry) = self.frontier.pop() {
            let key = entry.key().to_string();
            if self.finished.contains(&key) {
                continue;
            }

            let current = self
                .entry_states
                .get(&key)
                .copied()
                .unwrap_or(EntryState::Pending);
            if !current.can_transition_to(&EntryState::InFlight) {
                tracing::warn!("Dropping {} from frontier in state {}", key, current);
                continue;
            }

            self.entry_states.insert(key.clone(), EntryState::InFlight);
            self.in_flight.insert(key, entry.clone());
            return Some(entry);
        }

        None
    }

    /// Applies the result of one fetch attempt
    ///
    /// Success marks the URL done and enqueues its links. Failure is counted
    /// toward the adaptive stop thresholds and either re-enqueues the entry
    /// with its backoff delay or marks it permanently failed.
    ///
    /// # Arguments
    ///
    /// * `entry` - The entry returned by `next`
    /// * `result` - What the fetch attempt produced
    ///
    /// # Returns
    ///
    /// Whether the URL is now terminal, how many links were admitted, and the
    /// stop reason if this failure tripped a threshold
    pub fn record_result(
        &mut self,
        mut entry: FrontierEntry,
        result: Result<FetchedPage, FetchError>,
    ) -> RecordOutcome {
        let key = entry.key().to_string();
        self.in_flight.remove(&key);

        match result {
            Ok(page) => {
                self.set_entry_state(&key, EntryState::Done);
                self.finished.insert(key.clone());
                self.completed.push(key.clone());
                self.stats.pages_fetched += 1;

                self.outcomes.push(UrlOutcome::Success {
                    url: key.clone(),
                    title: page.title.clone(),
                    links_found: page.links.len(),
                    attempts: entry.attempt_count + 1,
                });

                let enqueued = if self.state == RunState::Running {
                    self.enqueue_discovered(&entry, &page.links)
                } else {
                    0
                };

                tracing::debug!("Done {} ({} new links)", key, enqueued);
                RecordOutcome {
                    terminal: true,
                    enqueued,
                    stopped: None,
                }
            }
            Err(error) => {
                let category = error.category();
                let stopped = self
                    .retry
                    .record_failure(&key, category, entry.attempt_count);

                let decision = self
                    .retry
                    .should_retry(entry.attempt_count, category, &self.budget);

                let terminal = match decision {
                    RetryDecision::Retry { delay, attempt } => {
                        tracing::warn!(
                            "Attempt {} for {} failed ({}): {}; retrying in {:?}",
                            entry.attempt_count + 1,
                            key,
                            category,
                            error.message(),
                            delay
                        );
                        self.set_entry_state(&key, EntryState::RetryScheduled { delay, attempt });
                        self.stats.retries_scheduled += 1;
                        entry.attempt_count = attempt;
                        entry.retry_delay = Some(delay);
                        self.frontier.requeue(entry);
                        false
                    }
                    RetryDecision::GiveUp => {
                        tracing::warn!(
                            "Giving up on {} after {} attempts ({}): {}",
                            key,
                            entry.attempt_count + 1,
                            category,
                            error.message()
                        );
                        self.set_entry_state(&key, EntryState::Failed);
                        self.finished.insert(key.clone());
                        self.failed.push(key.clone());
                        self.stats.pages_failed += 1;
                        self.outcomes.push(UrlOutcome::Failure {
                            url: key,
                            category,
                            message: error.message().to_string(),
                            attempts: entry.attempt_count + 1,
                        });
                        true
                    }
                };

                let stopped = stopped.filter(|_| self.state == RunState::Running);
                if let Some(reason) = stopped {
                    self.state = RunState::Stopped;
                    self.stop_reason = Some(reason);
                    tracing::warn!("Adaptive stop: {}", reason.describe());
                    for record in self.retry.recent_failures() {
                        tracing::debug!(
                            "Recent failure: {} ({}, attempt {}, at {})",
                            record.url,
                            record.category,
                            record.attempt + 1,
                            record.timestamp
                        );
                    }
                }

                RecordOutcome {
                    terminal,
                    enqueued: 0,
                    stopped,
                }
            }
        }
    }

    /// Returns an in-flight entry to the frontier without counting an attempt
    ///
    /// Used when no page session could be created for it.
    pub fn abandon(&mut self, entry: FrontierEntry) {
        let key = entry.key().to_string();
        self.in_flight.remove(&key);

        // The attempt never started, so the entry goes back to its prior state
        let state = match (entry.attempt_count, entry.retry_delay) {
            (0, _) => EntryState::Pending,
            (attempt, delay) => EntryState::RetryScheduled {
                delay: delay.unwrap_or_default(),
                attempt,
            },
        };
        self.entry_states.insert(key, state);
        self.frontier.requeue(entry);
    }

    fn set_entry_state(&mut self, key: &str, next: EntryState) {
        let current = self
            .entry_states
            .get(key)
            .copied()
            .unwrap_or(EntryState::InFlight);
        if !current.can_transition_to(&next) {
            tracing::warn!("Unexpected entry transition for {}: {} -> {}", key, current, next);
        }
        self.entry_states.insert(key.to_string(), next);
    }

    fn enqueue_discovered(&mut self, source: &FrontierEntry, links: &[Url]) -> usize {
        self.stats.links_discovered += links.len() as u64;

        let depth = source.depth + 1;
        if depth > self.budget.max_depth {
            self.stats.links_too_deep += links.len() as u64;
            return 0;
        }

        let mut enqueued = 0;
        for link in links {
            let url = match normalize_url(link.as_str()) {
                Ok(url) => url,
                Err(_) => continue,
            };

            if !self.scope.contains(&url) {
                self.stats.links_out_of_scope += 1;
                continue;
            }

            let score = match self.score_url(&url, depth) {
                UrlVerdict::Denied { pattern } => {
                    tracing::debug!("Denied {} (pattern {})", url, pattern);
                    self.stats.links_denied += 1;
                    continue;
                }
                UrlVerdict::Admit { score } => score,
            };

            match self
                .frontier
                .admit(url.clone(), depth, score, Some(source.url.clone()))
            {
                Ok(()) => {
                    self.entry_states.insert(url.to_string(), EntryState::Pending);
                    self.stats.links_enqueued += 1;
                    enqueued += 1;
                }
                Err(Rejection::AlreadySeen) => self.stats.links_duplicate += 1,
                Err(Rejection::OverBudget) => self.stats.links_over_budget += 1,
            }
        }

        enqueued
    }

    // ===== Checkpointing =====

    /// Snapshot of everything needed to resume
    ///
    /// In-flight entries are included so an interrupted run retries them.
    pub fn checkpoint_record(&self) -> CheckpointRecord {
        let mut frontier: Vec<FrontierEntry> = self.in_flight.values().cloned().collect();
        frontier.sort_by(|a, b| b.cmp(a));
        frontier.extend(self.frontier.snapshot());

        CheckpointRecord {
            completed: self.completed.clone(),
            failed: self.failed.clone(),
            frontier,
            outcomes: self.outcomes.clone(),
            stats: self.stats,
            errors: self.retry.counters(),
        }
    }

    /// Restores state saved by an earlier run
    ///
    /// Must be called before seeds are enqueued, so finished seeds are skipped.
    /// Saved error counters stay in reports, but the resumed run starts its
    /// adaptive stop accounting from zero.
    pub fn restore(&mut self, record: CheckpointRecord) {
        for url in record.completed.iter().chain(record.failed.iter()) {
            self.frontier.mark_seen(url);
            self.finished.insert(url.clone());
        }

        let mut restored = 0;
        for mut entry in record.frontier {
            if self.finished.contains(entry.key()) || self.frontier.is_seen(entry.key()) {
                continue;
            }
            if self.scope_to_seeds {
                if let Some(source) = &entry.source {
                    self.scope.include_seed(source);
                }
            }
            let state = if entry.attempt_count == 0 {
                EntryState::Pending
            } else {
                EntryState::RetryScheduled {
                    delay: std::time::Duration::ZERO,
                    attempt: entry.attempt_count,
                }
            };
            entry.retry_delay = None;
            self.entry_states.insert(entry.key().to_string(), state);
            self.frontier.restore(entry);
            restored += 1;
        }

        for url in &record.completed {
            self.entry_states.insert(url.clone(), EntryState::Done);
        }
        for url in &record.failed {
            self.entry_states.insert(url.clone(), EntryState::Failed);
        }

        tracing::info!(
            "Restored checkpoint: {} completed, {} failed, {} queued",
            record.completed.len(),
            record.failed.len(),
            restored
        );

        self.completed = record.completed;
        self.failed = record.failed;
        self.outcomes = record.outcomes;
        self.stats = record.stats;
        self.retry = RetryCoordinator::resumed(self.budget.stop_thresholds, record.errors);
    }

    // ===== Accessors =====

    /// The limits this scheduler was created with
    pub fn budget(&self) -> &CrawlBudget {
        &self.budget
    }

    /// Entries waiting in the frontier, not counting those in flight
    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    /// Entries handed to a worker whose result has not been recorded yet
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Current state of an admitted URL
    ///
    /// # Arguments
    ///
    /// * `url` - Normalized URL, as returned by `normalize_url`
    ///
    /// # Returns
    ///
    /// `None` if the URL was never admitted
    pub fn entry_state(&self, url: &str) -> Option<EntryState> {
        self.entry_states.get(url).copied()
    }

    /// URLs fetched successfully, in completion order (restored ones first)
    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    /// URLs that exhausted their retries
    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// True if `url` reached `Done` or `Failed` in this run or a restored one
    pub fn is_finished_url(&self, url: &str) -> bool {
        self.finished.contains(url)
    }

    /// Per-URL outcomes for the report
    pub fn outcomes(&self) -> &[UrlOutcome] {
        &self.outcomes
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats
    }

    /// Failed attempts by category, including any carried over by `restore`
    pub fn error_counters(&self) -> ErrorCounters {
        self.retry.counters()
    }

    /// URLs admitted but never finished
    pub fn unprocessed(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.in_flight.keys().cloned().collect();
        urls.sort();
        urls.extend(
            self.frontier
                .snapshot()
                .into_iter()
                .map(|e| e.url.to_string())
                .filter(|u| !self.finished.contains(u)),
        );
        urls
    }
}
