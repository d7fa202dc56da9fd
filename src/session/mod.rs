//! Browser sessions
//!
//! This module owns everything that touches the browser:
//! - Launch flag assembly and staged startup checks
//! - The driver seam and its Chrome implementation
//! - Proxy and stealth profiles
//! - Lifecycle observers
//! - The session pool that serializes page creation

mod chrome;
mod driver;
mod launch;
mod observer;
mod pool;
mod profile;

pub use chrome::{discover_browser, ChromeDriver};
pub use driver::{BrowserDriver, LaunchSpec, PageSetup, PageTarget, ProcessHandle};
pub use launch::{assemble_flags, dedupe_flags, truncate_diagnostic, BASE_FLAGS, DIAGNOSTIC_LIMIT};
pub use observer::{
    LifecyclePoint, LoggingObserver, ObserverError, ObserverList, ObserverOutcome, SessionObserver,
};
pub use pool::{BrowserProcess, PageSession, ProcessStatus, SessionPool};
pub use profile::{ProxyProfile, StealthProfile, Viewport, DEFAULT_USER_AGENT};

use thiserror::Error;

/// Session pool errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session creation failed: {reason}")]
    SessionCreationFailed { reason: String },

    #[error("Browser failed to start: {diagnostic}")]
    BrowserStartupFailed { diagnostic: String },

    #[error("No healthy browser process remains")]
    NoHealthyBrowser,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// True if the pool cannot create pages until a browser is relaunched
    pub fn is_pool_fatal(&self) -> bool {
        matches!(
            self,
            Self::BrowserStartupFailed { .. } | Self::NoHealthyBrowser
        )
    }
}
