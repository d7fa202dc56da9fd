//! Shared fakes for the integration tests
//!
//! `FakeDriver` stands in for a browser: it "spawns" processes that are
//! alive until told otherwise and records how many pages were being
//! created at once. `ScriptedFetcher` answers fetches from a per-URL script
//! and records every URL it was asked for.

#![allow(dead_code)]

use async_trait::async_trait;
use gleaner::config::{parse_config, Config};
use gleaner::crawler::{FetchError, FetchedPage, PageFetcher};
use gleaner::session::{
    BrowserDriver, LaunchSpec, PageSession, PageSetup, PageTarget, ProcessHandle, SessionError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

// ===== Browser fake =====

struct FakeProcess {
    alive: Arc<AtomicBool>,
    output: String,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn captured_output(&self) -> String {
        self.output.clone()
    }

    async fn kill(&mut self) -> Result<(), SessionError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeDriver {
    alive: Arc<AtomicBool>,
    dies_on_spawn: bool,
    endpoint_answers: bool,
    output: String,
    create_delay: Duration,
    failing_creates: AtomicUsize,
    creating: AtomicUsize,
    max_concurrent_creates: AtomicUsize,
    next_target: AtomicU64,
    pub spawned: Mutex<Vec<LaunchSpec>>,
    pub configured: Mutex<Vec<(String, PageSetup)>>,
    pub closed: Mutex<Vec<String>>,
}

impl FakeDriver {
    /// A browser that starts and stays up
    pub fn healthy() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(false)),
            dies_on_spawn: false,
            endpoint_answers: true,
            output: String::new(),
            create_delay: Duration::ZERO,
            failing_creates: AtomicUsize::new(0),
            creating: AtomicUsize::new(0),
            max_concurrent_creates: AtomicUsize::new(0),
            next_target: AtomicU64::new(1),
            spawned: Mutex::new(Vec::new()),
            configured: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    /// A browser that exits right after spawn, printing `output`
    pub fn crashing(output: impl Into<String>) -> Self {
        Self {
            dies_on_spawn: true,
            output: output.into(),
            ..Self::healthy()
        }
    }

    /// A browser that stays up but never opens its control socket
    pub fn unresponsive(output: impl Into<String>) -> Self {
        Self {
            endpoint_answers: false,
            output: output.into(),
            ..Self::healthy()
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// The next `count` page creations fail while the browser stays up
    pub fn with_failing_creates(self, count: usize) -> Self {
        self.failing_creates.store(count, Ordering::SeqCst);
        self
    }

    /// Simulates the browser crashing after startup
    pub fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn max_concurrent_creates(&self) -> usize {
        self.max_concurrent_creates.load(Ordering::SeqCst)
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Page setups applied so far, keyed by target id
    pub fn configured_pages(&self) -> Vec<(String, PageSetup)> {
        self.configured.lock().unwrap().clone()
    }

    pub fn closed_targets(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SessionError> {
        self.spawned.lock().unwrap().push(spec.clone());
        self.alive.store(!self.dies_on_spawn, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            alive: Arc::clone(&self.alive),
            output: self.output.clone(),
        }))
    }

    async fn check_endpoint(&self, debug_port: u16) -> Result<(), SessionError> {
        if self.endpoint_answers && self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Driver(format!("port {} refused", debug_port)))
        }
    }

    async fn create_page(&self, _debug_port: u16) -> Result<PageTarget, SessionError> {
        let now = self.creating.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_creates.fetch_max(now, Ordering::SeqCst);

        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }

        self.creating.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::Driver("Target.createTarget failed".to_string()));
        }

        let id = self.next_target.fetch_add(1, Ordering::SeqCst);
        Ok(PageTarget {
            id: format!("target-{}", id),
        })
    }

    async fn configure_page(
        &self,
        _debug_port: u16,
        target_id: &str,
        setup: &PageSetup,
    ) -> Result<(), SessionError> {
        self.configured
            .lock()
            .unwrap()
            .push((target_id.to_string(), setup.clone()));
        Ok(())
    }

    async fn close_page(&self, _debug_port: u16, target_id: &str) -> Result<(), SessionError> {
        self.closed.lock().unwrap().push(target_id.to_string());
        Ok(())
    }
}

// ===== Fetcher fake =====

/// Answers fetches from a per-URL script
///
/// Each URL has a queue of results; the last one repeats once the queue is
/// down to one. Unscripted URLs succeed with no links.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, VecDeque<Result<FetchedPage, FetchError>>>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page at `url` linking to `links`
    pub fn page(self, url: &str, links: &[&str]) -> Self {
        let page = FetchedPage {
            final_url: Url::parse(url).unwrap(),
            status: 200,
            title: Some(format!("Page {}", url)),
            links: links.iter().map(|l| Url::parse(l).unwrap()).collect(),
        };
        self.respond(url, Ok(page))
    }

    /// Every attempt on `url` fails with `error`
    pub fn fail(self, url: &str, error: FetchError) -> Self {
        self.respond(url, Err(error))
    }

    pub fn respond(self, url: &str, result: Result<FetchedPage, FetchError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Every URL fetched so far, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, url: &str) -> usize {
        self.attempts().iter().filter(|u| u.as_str() == url).count()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, _session: &PageSession, url: &Url) -> Result<FetchedPage, FetchError> {
        self.attempts.lock().unwrap().push(url.to_string());

        let mut script = self.script.lock().unwrap();
        match script.get_mut(url.as_str()) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap(),
            None => Ok(FetchedPage {
                final_url: url.clone(),
                status: 200,
                title: None,
                links: Vec::new(),
            }),
        }
    }
}

// ===== Configuration =====

/// A configuration tuned for fast tests
///
/// No pacing delay, a 5ms retry base and a single worker so fetch order is
/// deterministic.
pub fn test_config(max_pages: u32, max_retries: u32) -> Config {
    parse_config(&format!(
        r#"
        [budget]
        max-pages = {max_pages}
        max-retries = {max_retries}
        max-depth = 3
        base-delay-ms = 0
        retry-delay-ms = 5
        settle-delay-ms = 0
        workers = 1

        [browser]
        startup-checks-ms = [1, 5, 10]

        [checkpoint]
        enabled = false
        "#
    ))
    .unwrap()
}
