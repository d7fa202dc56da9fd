//! Per-URL outcomes and crawl counters

use crate::crawler::ErrorCategory;
use serde::{Deserialize, Serialize};

/// Final result for one URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UrlOutcome {
    Success {
        url: String,
        title: Option<String>,
        links_found: usize,
        attempts: u32,
    },
    Failure {
        url: String,
        category: ErrorCategory,
        message: String,
        attempts: u32,
    },
}

impl UrlOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }
}

/// Counters describing what the scheduler did with discovered links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_fetched: u64,
    pub pages_failed: u64,
    pub retries_scheduled: u64,
    pub links_discovered: u64,
    pub links_enqueued: u64,
    pub links_denied: u64,
    pub links_out_of_scope: u64,
    pub links_duplicate: u64,
    pub links_too_deep: u64,
    pub links_over_budget: u64,
}

impl CrawlStats {
    /// Share of finished URLs that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.pages_fetched + self.pages_failed;
        if finished == 0 {
            0.0
        } else {
            self.pages_fetched as f64 / finished as f64 * 100.0
        }
    }
}
