use crate::session::{ProxyProfile, StealthProfile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Gleaner
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub budget: CrawlBudget,

    #[serde(default)]
    pub patterns: PatternConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Proxy used by every page session
    #[serde(default)]
    pub proxy: Option<ProxyProfile>,

    /// Fingerprint profiles; one is picked per page session
    #[serde(default)]
    pub stealth: Vec<StealthProfile>,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Seed URLs, merged with any given on the command line
    #[serde(default)]
    pub seeds: Vec<String>,
}

/// Immutable per-run limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrawlBudget {
    /// Maximum link depth from a seed (seeds are depth 0)
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of distinct URLs admitted to the frontier
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Retries allowed per URL after its first attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Mean pause between dequeues (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Base of the exponential retry backoff (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Number of concurrent fetch workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Attempt-level page load budget (milliseconds)
    #[serde(rename = "page-timeout-ms", default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,

    /// Pause after load before content is read (milliseconds)
    #[serde(rename = "settle-delay-ms", default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(rename = "stop-thresholds", default)]
    pub stop_thresholds: StopThresholds,
}

impl CrawlBudget {
    /// Creates a budget with default limits and the given page cap
    pub fn with_max_pages(max_pages: u32) -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            workers: default_workers(),
            page_timeout_ms: default_page_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            stop_thresholds: StopThresholds::default(),
        }
    }

    /// Pacing base between dequeues
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Limit on one fetch attempt, navigation and load included
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Error counts at which a run stops adaptively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct StopThresholds {
    #[serde(rename = "bot-detection", default = "default_bot_threshold")]
    pub bot_detection: u32,

    #[serde(rename = "rate-limit", default = "default_rate_limit_threshold")]
    pub rate_limit: u32,

    #[serde(default = "default_network_threshold")]
    pub network: u32,

    #[serde(default = "default_total_threshold")]
    pub total: u32,
}

impl Default for StopThresholds {
    fn default() -> Self {
        Self {
            bot_detection: default_bot_threshold(),
            rate_limit: default_rate_limit_threshold(),
            network: default_network_threshold(),
            total: default_total_threshold(),
        }
    }
}

/// URL filtering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    /// Deny regexes; the built-in list is used when absent
    #[serde(default)]
    pub deny: Option<Vec<String>>,

    /// Allow regexes; the built-in list is used when absent
    #[serde(default)]
    pub allow: Option<Vec<String>>,

    /// Domain patterns (e.g. "*.example.com") links must stay within
    #[serde(rename = "allowed-domains", default)]
    pub allowed_domains: Vec<String>,

    /// Restrict discovered links to the seed domains when no allowed domains are set
    #[serde(rename = "same-site-only", default = "default_true")]
    pub same_site_only: bool,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            deny: None,
            allow: None,
            allowed_domains: Vec::new(),
            same_site_only: true,
        }
    }
}

/// Browser process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Path to the Chrome/Chromium binary; discovered when absent
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Port for the debug-protocol connection
    #[serde(rename = "debug-port", default = "default_debug_port")]
    pub debug_port: u16,

    /// Extra launch flags supplied by the user
    #[serde(default)]
    pub flags: Vec<String>,

    /// Offsets after spawn at which liveness is checked (milliseconds)
    #[serde(rename = "startup-checks-ms", default = "default_startup_checks")]
    pub startup_checks_ms: Vec<u64>,

    /// Profile directory; a temporary one is used when absent
    #[serde(rename = "user-data-dir", default)]
    pub user_data_dir: Option<PathBuf>,

    /// How pages are fetched once a session is acquired
    #[serde(rename = "fetch-mode", default)]
    pub fetch_mode: FetchMode,
}

/// Page fetch strategy
///
/// `Browser` navigates the session's own page; `Http` skips the browser for
/// page content and fetches with a plain HTTP client carrying the session's
/// user agent and proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    #[default]
    Browser,
    Http,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            debug_port: default_debug_port(),
            flags: Vec::new(),
            startup_checks_ms: default_startup_checks(),
            user_data_dir: None,
            fetch_mode: FetchMode::default(),
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Path to the SQLite checkpoint database
    #[serde(default = "default_checkpoint_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
            enabled: true,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Path of the markdown run report, if one should be written
    #[serde(rename = "report-path", default)]
    pub report_path: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_workers() -> u32 {
    4
}

fn default_page_timeout_ms() -> u64 {
    30_000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_bot_threshold() -> u32 {
    5
}

fn default_rate_limit_threshold() -> u32 {
    3
}

fn default_network_threshold() -> u32 {
    5
}

fn default_total_threshold() -> u32 {
    8
}

fn default_debug_port() -> u16 {
    9222
}

fn default_startup_checks() -> Vec<u64> {
    vec![100, 200, 300]
}

fn default_checkpoint_path() -> String {
    "./gleaner-checkpoint.db".to_string()
}
