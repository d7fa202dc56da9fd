//! Failure classification, retry backoff and adaptive stop counters

use crate::config::{CrawlBudget, StopThresholds};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Lowest and highest jitter multipliers applied to a retry delay
pub const RETRY_JITTER: (f64, f64) = (0.8, 1.2);

/// What kind of failure a fetch attempt ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BotDetection,
    RateLimit,
    Timeout,
    Network,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotDetection => "bot_detection",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    category: ErrorCategory,
    markers: &'static [&'static str],
}

/// Classification rules, evaluated top to bottom; the first match wins
///
/// Bot detection must stay ahead of rate limiting: an aborted connection
/// means the site is actively blocking us, not throttling us.
const RULES: &[Rule] = &[
    Rule {
        category: ErrorCategory::BotDetection,
        markers: &["aborted", "blocked", "403", "forbidden", "cloudflare", "captcha"],
    },
    Rule {
        category: ErrorCategory::RateLimit,
        markers: &["rate limit", "ratelimit", "too many requests", "quota", "429"],
    },
    Rule {
        category: ErrorCategory::Timeout,
        markers: &["timeout", "timed out", "deadline exceeded"],
    },
    Rule {
        category: ErrorCategory::Network,
        markers: &[
            "network",
            "connection",
            "connect",
            "dns",
            "name_not_resolved",
            "unreachable",
            "refused",
            "reset",
            "tls",
            "ssl",
            "certificate",
            "err_",
        ],
    },
];

/// Maps an error message to its category
///
/// Matching is case-insensitive; anything no rule recognizes is `Other`.
pub fn classify(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.markers.iter().any(|m| message.contains(m)))
        .map_or(ErrorCategory::Other, |rule| rule.category)
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub url: String,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
}

/// Failed attempts per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounters {
    pub bot_detection: u32,
    pub rate_limit: u32,
    pub timeout: u32,
    pub network: u32,
    pub other: u32,
    pub total: u32,
}

impl ErrorCounters {
    pub fn get(&self, category: ErrorCategory) -> u32 {
        match category {
            ErrorCategory::BotDetection => self.bot_detection,
            ErrorCategory::RateLimit => self.rate_limit,
            ErrorCategory::Timeout => self.timeout,
            ErrorCategory::Network => self.network,
            ErrorCategory::Other => self.other,
        }
    }

    fn increment(&mut self, category: ErrorCategory) {
        let slot = match category {
            ErrorCategory::BotDetection => &mut self.bot_detection,
            ErrorCategory::RateLimit => &mut self.rate_limit,
            ErrorCategory::Timeout => &mut self.timeout,
            ErrorCategory::Network => &mut self.network,
            ErrorCategory::Other => &mut self.other,
        };
        *slot += 1;
        self.total += 1;
    }

    /// Sum of two sets of counters
    pub fn merged(&self, other: &ErrorCounters) -> ErrorCounters {
        ErrorCounters {
            bot_detection: self.bot_detection + other.bot_detection,
            rate_limit: self.rate_limit + other.rate_limit,
            timeout: self.timeout + other.timeout,
            network: self.network + other.network,
            other: self.other + other.other,
            total: self.total + other.total,
        }
    }

    /// Counts in category order, for reports
    pub fn by_category(&self) -> [(ErrorCategory, u32); 5] {
        [
            (ErrorCategory::BotDetection, self.bot_detection),
            (ErrorCategory::RateLimit, self.rate_limit),
            (ErrorCategory::Timeout, self.timeout),
            (ErrorCategory::Network, self.network),
            (ErrorCategory::Other, self.other),
        ]
    }
}

/// The counter that tripped an adaptive stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopTrigger {
    BotDetection,
    RateLimit,
    Network,
    Total,
}

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReason {
    pub trigger: StopTrigger,
    pub count: u32,
    pub threshold: u32,
}

impl StopReason {
    /// Stable key of the triggering counter, e.g. `"bot_detection"`
    pub fn key(&self) -> &'static str {
        match self.trigger {
            StopTrigger::BotDetection => "bot_detection",
            StopTrigger::RateLimit => "rate_limit",
            StopTrigger::Network => "network",
            StopTrigger::Total => "total",
        }
    }

    pub fn describe(&self) -> String {
        let what = match self.trigger {
            StopTrigger::BotDetection => "bot-detection failures; the site appears to be blocking the crawler",
            StopTrigger::RateLimit => "rate-limit failures; the site is throttling requests",
            StopTrigger::Network => "network or timeout failures; the site appears unreachable",
            StopTrigger::Total => "failed attempts in total",
        };
        format!(
            "stopped after {} {} (threshold {})",
            self.count, what, self.threshold
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key(), self.describe())
    }
}

/// Result of asking whether a failed entry may run again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, attempt: u32 },
    GiveUp,
}

/// Returns `retry_delay × 2^attempt`, scaled by a fresh jitter draw
///
/// The jitter is drawn on every call so concurrent retries spread out.
pub fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    let (low, high) = RETRY_JITTER;
    let factor = rand::rng().random_range(low..=high);
    let exponent = 2f64.powi(attempt.min(63) as i32);
    Duration::try_from_secs_f64(retry_delay.as_secs_f64() * exponent * factor)
        .unwrap_or(Duration::MAX)
}

/// Failed attempts kept for diagnostics; older ones are dropped
pub const RECENT_FAILURE_LIMIT: usize = 32;

/// Owns the error counters and makes retry decisions
///
/// Counters carried over from a checkpoint are kept apart from the ones this
/// run accumulates: both are reported, but only this run's failures can trip
/// an adaptive stop.
#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    thresholds: StopThresholds,
    counters: ErrorCounters,
    carried: ErrorCounters,
    recent: VecDeque<ErrorRecord>,
}

impl RetryCoordinator {
    /// Creates a coordinator with every counter at zero
    pub fn new(thresholds: StopThresholds) -> Self {
        Self {
            thresholds,
            counters: ErrorCounters::default(),
            carried: ErrorCounters::default(),
            recent: VecDeque::with_capacity(RECENT_FAILURE_LIMIT),
        }
    }

    /// Rebuilds a coordinator for a resumed run
    ///
    /// # Arguments
    ///
    /// * `thresholds` - Stop thresholds for the new run
    /// * `carried` - Counters saved by the earlier run; reported, never re-checked
    pub fn resumed(thresholds: StopThresholds, carried: ErrorCounters) -> Self {
        Self {
            carried,
            ..Self::new(thresholds)
        }
    }

    pub fn classify(&self, message: &str) -> ErrorCategory {
        classify(message)
    }

    /// Decides whether an entry that has made `attempt_count` retries may run again
    ///
    /// # Arguments
    ///
    /// * `attempt_count` - Retries already made for the entry
    /// * `category` - Category of the failure just recorded
    /// * `budget` - Supplies `max_retries` and the retry delay base
    ///
    /// # Returns
    ///
    /// `Retry` with a freshly jittered delay, or `GiveUp` once retries are spent
    pub fn should_retry(
        &self,
        attempt_count: u32,
        category: ErrorCategory,
        budget: &CrawlBudget,
    ) -> RetryDecision {
        if attempt_count >= budget.max_retries {
            tracing::debug!(
                "No retries left after {} attempts ({})",
                attempt_count + 1,
                category
            );
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry {
            delay: backoff_delay(budget.retry_delay(), attempt_count),
            attempt: attempt_count + 1,
        }
    }

    /// Records a failed attempt
    ///
    /// # Returns
    ///
    /// A stop reason if this failure moved its own category's counter, or the
    /// total, to its threshold. Counters this failure did not touch are never
    /// reported, so the reason always names the triggering category.
    pub fn record_failure(
        &mut self,
        url: &str,
        category: ErrorCategory,
        attempt: u32,
    ) -> Option<StopReason> {
        self.counters.increment(category);

        if self.recent.len() == RECENT_FAILURE_LIMIT {
            self.recent.pop_front();
        }
        self.recent.push_back(ErrorRecord {
            url: url.to_string(),
            category,
            timestamp: Utc::now(),
            attempt,
        });

        let c = &self.counters;
        let t = &self.thresholds;
        let own = match category {
            ErrorCategory::BotDetection => Some((StopTrigger::BotDetection, c.bot_detection, t.bot_detection)),
            ErrorCategory::RateLimit => Some((StopTrigger::RateLimit, c.rate_limit, t.rate_limit)),
            ErrorCategory::Timeout | ErrorCategory::Network => {
                Some((StopTrigger::Network, c.network + c.timeout, t.network))
            }
            ErrorCategory::Other => None,
        };

        own.into_iter()
            .chain(std::iter::once((StopTrigger::Total, c.total, t.total)))
            .find(|(_, count, threshold)| count >= threshold)
            .map(|(trigger, count, threshold)| StopReason {
                trigger,
                count,
                threshold,
            })
    }

    /// All failures, including those carried over from a checkpoint
    pub fn counters(&self) -> ErrorCounters {
        self.carried.merged(&self.counters)
    }

    /// Failures recorded by this run only
    pub fn run_counters(&self) -> ErrorCounters {
        self.counters
    }

    /// The most recent failed attempts, oldest first
    pub fn recent_failures(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.recent.iter()
    }
}
