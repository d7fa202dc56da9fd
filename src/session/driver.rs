//! The seam between the session pool and a concrete browser
//!
//! The pool never talks to a browser directly; it goes through a
//! [`BrowserDriver`], which lets tests substitute an in-memory fake.

use crate::session::{ProxyProfile, SessionError, Viewport};
use async_trait::async_trait;
use std::path::PathBuf;

/// Everything needed to spawn one browser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    /// Final, deduplicated launch flags
    pub flags: Vec<String>,
    pub debug_port: u16,
}

/// A page target created over the debug protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub id: String,
}

/// Identity applied to a page before its first navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSetup {
    pub user_agent: String,
    pub viewport: Viewport,
    /// Upstream proxy; its credentials answer the proxy's auth challenges
    pub proxy: Option<ProxyProfile>,
}

/// A spawned browser process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if the process is still known to the OS
    fn id(&self) -> Option<u32>;

    /// Returns false once the process has exited
    fn is_alive(&mut self) -> bool;

    /// Output captured from the process so far
    fn captured_output(&self) -> String;

    /// Terminates the process and waits for it
    async fn kill(&mut self) -> Result<(), SessionError>;
}

/// Spawns browsers and manages their pages
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SessionError>;

    /// Succeeds once the control socket on `debug_port` answers
    async fn check_endpoint(&self, debug_port: u16) -> Result<(), SessionError>;

    async fn create_page(&self, debug_port: u16) -> Result<PageTarget, SessionError>;

    /// Applies user agent, viewport and proxy authentication to a new page
    ///
    /// Drivers whose pages carry no identity of their own keep the default.
    async fn configure_page(
        &self,
        _debug_port: u16,
        _target_id: &str,
        _setup: &PageSetup,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close_page(&self, debug_port: u16, target_id: &str) -> Result<(), SessionError>;
}
