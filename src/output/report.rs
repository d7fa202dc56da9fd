//! Run report and console output

use crate::crawler::{ErrorCounters, StopReason};
use crate::output::stats::{CrawlStats, UrlOutcome};
use crate::state::RunState;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Everything a finished run reports back to its caller
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    /// Set when an error threshold stopped the run
    pub stop_reason: Option<StopReason>,
    /// Set when the run was stopped from outside
    pub interrupted: bool,
    /// Set when the run failed
    pub failure: Option<String>,
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<UrlOutcome>,
    pub errors: ErrorCounters,
    pub stats: CrawlStats,
    /// Admitted URLs that never reached a terminal state
    pub unprocessed: Vec<String>,
}

impl RunReport {
    /// Process exit code: 0 completed, 1 stopped, 2 failed
    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    /// Wall-clock time from start to finish; zero if the clock went backwards
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &UrlOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UrlOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Human-readable reason the run ended the way it did
    pub fn end_reason(&self) -> String {
        match self.state {
            RunState::Completed => "frontier exhausted".to_string(),
            RunState::Stopped => match (&self.stop_reason, self.interrupted) {
                (Some(reason), _) => reason.describe(),
                (None, true) => "interrupted".to_string(),
                (None, false) => "stopped".to_string(),
            },
            RunState::Failed => self
                .failure
                .clone()
                .unwrap_or_else(|| "failed".to_string()),
            other => other.to_string(),
        }
    }
}

/// Prints a report to stdout
pub fn print_report(report: &RunReport) {
    println!("=== Crawl Report ===\n");

    println!("Run:");
    println!("  State: {} ({})", report.state, report.end_reason());
    if let Some(reason) = &report.stop_reason {
        println!("  Stop trigger: {}", reason.key());
    }
    println!("  Resumed: {}", if report.resumed { "yes" } else { "no" });
    println!("  Duration: {:.1}s", report.duration().as_secs_f64());
    println!();

    println!("Pages:");
    println!("  Fetched: {}", report.stats.pages_fetched);
    println!("  Failed: {}", report.stats.pages_failed);
    println!("  Retries scheduled: {}", report.stats.retries_scheduled);
    println!("  Success rate: {:.1}%", report.stats.success_rate());
    println!();

    println!("Links:");
    println!("  Discovered: {}", report.stats.links_discovered);
    println!("  Enqueued: {}", report.stats.links_enqueued);
    println!("  Denied: {}", report.stats.links_denied);
    println!("  Out of scope: {}", report.stats.links_out_of_scope);
    println!("  Too deep: {}", report.stats.links_too_deep);
    println!("  Over budget: {}", report.stats.links_over_budget);
    println!();

    if report.errors.total > 0 {
        println!("Errors by category:");
        for (category, count) in report.errors.by_category() {
            if count > 0 {
                println!("  {}: {}", category, count);
            }
        }
        println!();
    }

    if report.failed().next().is_some() {
        println!("Failed URLs:");
        for outcome in report.failed() {
            if let UrlOutcome::Failure {
                url,
                category,
                attempts,
                ..
            } = outcome
            {
                println!("  - {} ({}, {} attempts)", url, category, attempts);
            }
        }
        println!();
    }

    if !report.unprocessed.is_empty() {
        println!("Unprocessed URLs ({}):", report.unprocessed.len());
        for url in &report.unprocessed {
            println!("  - {}", url);
        }
        println!();
    }
}
