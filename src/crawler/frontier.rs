//! Priority frontier of URLs awaiting a fetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use url::Url;

/// A URL admitted to the frontier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,

    /// Link distance from a seed (seeds are 0)
    pub depth: u32,

    /// Priority; higher is fetched first
    pub score: f64,

    /// Page the link was found on
    pub source: Option<Url>,

    pub discovered_at: DateTime<Utc>,

    /// Retries already granted
    pub attempt_count: u32,

    /// Discovery order, used to break score ties
    pub sequence: u64,

    /// Backoff to wait before the next attempt
    #[serde(skip)]
    pub retry_delay: Option<Duration>,
}

impl FrontierEntry {
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

// Higher scores pop first; among equal scores, earlier discoveries pop first
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

/// Why a URL was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AlreadySeen,
    OverBudget,
}

/// Max-heap of entries plus the set of every URL ever admitted
#[derive(Debug, Clone)]
pub struct Frontier {
    heap: BinaryHeap<FrontierEntry>,
    admitted: HashSet<String>,
    next_sequence: u64,
    max_pages: usize,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_pages` - Cap on URLs admitted over the frontier's lifetime,
    ///   including those already popped
    pub fn new(max_pages: u32) -> Self {
        Self {
            heap: BinaryHeap::new(),
            admitted: HashSet::new(),
            next_sequence: 0,
            max_pages: max_pages as usize,
        }
    }

    /// Admits a URL seen for the first time
    ///
    /// Admission is refused for URLs admitted before and once `max_pages`
    /// URLs have been admitted in total.
    pub fn admit(
        &mut self,
        url: Url,
        depth: u32,
        score: f64,
        source: Option<Url>,
    ) -> Result<(), Rejection> {
        if self.admitted.contains(url.as_str()) {
            return Err(Rejection::AlreadySeen);
        }
        if self.admitted.len() >= self.max_pages {
            return Err(Rejection::OverBudget);
        }

        self.admitted.insert(url.as_str().to_string());
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.heap.push(FrontierEntry {
            url,
            depth,
            score,
            source,
            discovered_at: Utc::now(),
            attempt_count: 0,
            sequence,
            retry_delay: None,
        });
        Ok(())
    }

    /// Puts a dequeued entry back for an authorized retry
    pub fn requeue(&mut self, entry: FrontierEntry) {
        self.heap.push(entry);
    }

    /// Removes the highest-priority entry
    ///
    /// # Returns
    ///
    /// The entry with the highest score; ties go to the earliest admitted
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.heap.pop()
    }

    /// Marks a URL as seen without queuing it (completed in an earlier run)
    pub fn mark_seen(&mut self, url: &str) {
        self.admitted.insert(url.to_string());
    }

    /// Restores an entry saved by an earlier run, keeping its sequence
    pub fn restore(&mut self, mut entry: FrontierEntry) {
        self.admitted.insert(entry.url.as_str().to_string());
        self.next_sequence = self.next_sequence.max(entry.sequence + 1);
        entry.retry_delay = None;
        self.heap.push(entry);
    }

    pub fn is_seen(&self, url: &str) -> bool {
        self.admitted.contains(url)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// URLs admitted so far, queued or not
    pub fn admitted_count(&self) -> usize {
        self.admitted.len()
    }

    /// True once no further URL can be admitted
    pub fn is_full(&self) -> bool {
        self.admitted.len() >= self.max_pages
    }

    /// Queued entries in the order they would be popped
    pub fn snapshot(&self) -> Vec<FrontierEntry> {
        let mut entries = self.heap.clone().into_sorted_vec();
        entries.reverse();
        entries
    }
}
