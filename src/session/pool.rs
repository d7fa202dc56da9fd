//! Browser process lifecycle and page session creation
//!
//! [`SessionPool`] is the only place page sessions are created. Creation is
//! serialized through a single async mutex: at most one creation runs at any
//! instant, while sessions already handed out keep fetching in parallel.
//! Every caller gets a page of its own; an existing page is only returned
//! again for the persistent session id it was created under.

use crate::config::BrowserConfig;
use crate::session::driver::{BrowserDriver, LaunchSpec, PageSetup, ProcessHandle};
use crate::session::launch::{assemble_flags, run_startup_checks, truncate_diagnostic};
use crate::session::observer::{
    LifecyclePoint, ObserverList, ObserverOutcome, SessionObserver,
};
use crate::session::{ProxyProfile, SessionError, StealthProfile, Viewport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use url::Url;

/// Lifecycle status of a browser process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Starting,
    Ready,
    Failed,
    Terminated,
}

/// Snapshot of a browser process owned by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProcess {
    pub pid: Option<u32>,
    pub debug_port: u16,
    pub status: ProcessStatus,
    pub launched_at: DateTime<Utc>,
}

type SharedHandle = Arc<tokio::sync::Mutex<Box<dyn ProcessHandle>>>;

struct ManagedProcess {
    info: BrowserProcess,
    handle: SharedHandle,
}

/// An isolated page bound to one browser process
#[derive(Debug, Clone)]
pub struct PageSession {
    /// Pool-unique id
    pub id: u64,
    /// Debug-protocol target id of the page
    pub target_id: String,
    /// Persistent session id, if the caller asked for one
    pub session_id: Option<String>,
    pub debug_port: u16,
    pub viewport: Viewport,
    pub user_agent: String,
    pub proxy: Option<ProxyProfile>,
    pub created_at: DateTime<Utc>,
    in_use: Arc<AtomicBool>,
}

impl PageSession {
    /// A session bound to no browser
    ///
    /// Used when pages are fetched without a browser (dry runs, plain HTTP).
    pub fn detached(target_id: &str) -> Self {
        let stealth = StealthProfile::default();
        Self {
            id: 0,
            target_id: target_id.to_string(),
            session_id: None,
            debug_port: 0,
            viewport: stealth.viewport(),
            user_agent: stealth.user_agent().to_string(),
            proxy: None,
            created_at: Utc::now(),
            in_use: Arc::new(AtomicBool::new(true)),
        }
    }

    /// True while a caller holds the session
    ///
    /// # Returns
    ///
    /// `false` once the session has been released or closed
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// True if the session was created under a persistent session id
    pub fn is_persistent(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Owns browser processes and hands out page sessions
pub struct SessionPool {
    driver: Arc<dyn BrowserDriver>,
    default_proxy: Option<ProxyProfile>,
    stealth_profiles: Vec<StealthProfile>,
    observers: ObserverList,
    processes: tokio::sync::Mutex<Vec<ManagedProcess>>,
    creation_lock: tokio::sync::Mutex<()>,
    persistent: Mutex<HashMap<String, PageSession>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl SessionPool {
    /// Creates an empty pool
    ///
    /// No browser is started until [`SessionPool::launch`] is called.
    ///
    /// # Arguments
    ///
    /// * `driver` - The browser driver every process and page goes through
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            default_proxy: None,
            stealth_profiles: Vec::new(),
            observers: ObserverList::new(),
            processes: tokio::sync::Mutex::new(Vec::new()),
            creation_lock: tokio::sync::Mutex::new(()),
            persistent: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Proxy used for launch flags and for pages acquired without one
    pub fn with_proxy(mut self, proxy: Option<ProxyProfile>) -> Self {
        self.default_proxy = proxy;
        self
    }

    /// Profiles picked from at random for pages acquired without one
    pub fn with_stealth_profiles(mut self, profiles: Vec<StealthProfile>) -> Self {
        self.stealth_profiles = profiles;
        self
    }

    /// Registers a lifecycle observer; observers run in registration order
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    /// Spawns a browser and waits for it to pass the staged startup checks
    ///
    /// # Errors
    ///
    /// * `SessionError::BrowserStartupFailed` - The process died or its
    ///   control socket never answered; carries up to 200 characters of the
    ///   process output
    pub async fn launch(&self, browser: &BrowserConfig) -> Result<BrowserProcess, SessionError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SessionError::SessionCreationFailed {
                reason: "pool is shut down".to_string(),
            });
        }

        let spec = LaunchSpec {
            executable: browser
                .executable
                .clone()
                .unwrap_or_else(|| PathBuf::from("chromium")),
            flags: assemble_flags(browser, self.default_proxy.as_ref()),
            debug_port: browser.debug_port,
        };

        let handle = self.driver.spawn(&spec).await?;
        let spawned_at = Instant::now();
        let pid = handle.id();
        let handle: SharedHandle = Arc::new(tokio::sync::Mutex::new(handle));

        let slot = {
            let mut processes = self.processes.lock().await;
            processes.push(ManagedProcess {
                info: BrowserProcess {
                    pid,
                    debug_port: spec.debug_port,
                    status: ProcessStatus::Starting,
                    launched_at: Utc::now(),
                },
                handle: Arc::clone(&handle),
            });
            processes.len() - 1
        };

        let mut process = handle.lock().await;
        let checked = run_startup_checks(
            process.as_mut(),
            self.driver.as_ref(),
            spec.debug_port,
            spawned_at,
            &browser.startup_checks_ms,
        )
        .await;

        if let Err(e) = checked {
            if let Err(kill_err) = process.kill().await {
                tracing::warn!("Failed to clean up browser after startup failure: {}", kill_err);
            }
            drop(process);
            self.set_status(slot, ProcessStatus::Terminated).await;
            return Err(e);
        }
        drop(process);

        let mut processes = self.processes.lock().await;
        let Some(managed) = processes.get_mut(slot) else {
            return Err(SessionError::SessionCreationFailed {
                reason: "browser process was lost during startup".to_string(),
            });
        };
        if managed.info.status != ProcessStatus::Starting {
            return Err(SessionError::SessionCreationFailed {
                reason: "pool is shut down".to_string(),
            });
        }
        managed.info.status = ProcessStatus::Ready;

        tracing::info!(
            "Browser ready (pid {:?}, debug port {})",
            managed.info.pid,
            managed.info.debug_port
        );

        Ok(managed.info.clone())
    }

    /// Returns a page session for one fetch
    ///
    /// With a `session_id` that already has a live session, that session is
    /// returned as is; callers must not use one id from two fetches at once.
    /// Every other call creates a new page under the global creation lock and
    /// applies the picked user agent, viewport and proxy to it before
    /// returning.
    ///
    /// # Arguments
    ///
    /// * `proxy` - Proxy for this page; the pool's default when `None`
    /// * `stealth` - Fingerprint for this page; picked at random when `None`
    /// * `session_id` - Persistent session id to create or reuse
    ///
    /// # Errors
    ///
    /// * `SessionError::SessionCreationFailed` - No browser was launched, or
    ///   the browser refused to create or configure the page
    /// * `SessionError::NoHealthyBrowser` - Every launched browser has died
    pub async fn acquire_page(
        &self,
        proxy: Option<&ProxyProfile>,
        stealth: Option<&StealthProfile>,
        session_id: Option<&str>,
    ) -> Result<PageSession, SessionError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SessionError::SessionCreationFailed {
                reason: "pool is shut down".to_string(),
            });
        }

        if let Some(existing) = session_id.and_then(|id| self.persistent_session(id)) {
            return Ok(existing);
        }

        let _creating = self.creation_lock.lock().await;

        // Another caller may have created it while we waited
        if let Some(existing) = session_id.and_then(|id| self.persistent_session(id)) {
            return Ok(existing);
        }

        let debug_port = self.ready_port().await?;

        let target = self
            .driver
            .create_page(debug_port)
            .await
            .map_err(|e| SessionError::SessionCreationFailed {
                reason: e.to_string(),
            })?;

        let picked = stealth
            .cloned()
            .or_else(|| StealthProfile::pick(&self.stealth_profiles).cloned())
            .unwrap_or_default();

        let setup = PageSetup {
            user_agent: picked.user_agent().to_string(),
            viewport: picked.viewport(),
            proxy: proxy.cloned().or_else(|| self.default_proxy.clone()),
        };

        if let Err(e) = self
            .driver
            .configure_page(debug_port, &target.id, &setup)
            .await
        {
            if let Err(close_err) = self.driver.close_page(debug_port, &target.id).await {
                tracing::debug!("Failed to close unconfigured page {}: {}", target.id, close_err);
            }
            return Err(SessionError::SessionCreationFailed {
                reason: e.to_string(),
            });
        }

        let session = PageSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            target_id: target.id,
            session_id: session_id.map(str::to_string),
            debug_port,
            viewport: setup.viewport,
            user_agent: setup.user_agent,
            proxy: setup.proxy,
            created_at: Utc::now(),
            in_use: Arc::new(AtomicBool::new(true)),
        };

        self.observers
            .notify(LifecyclePoint::Create, &session, None);

        if let Some(id) = session_id {
            self.lock_persistent().insert(id.to_string(), session.clone());
        }

        tracing::debug!("Created session {} on target {}", session.id, session.target_id);
        Ok(session)
    }

    /// Returns a session to the pool
    ///
    /// Persistent sessions stay alive and are marked idle; all others are
    /// closed immediately.
    pub async fn release_page(&self, session: PageSession) -> Result<(), SessionError> {
        let kept = session
            .session_id
            .as_deref()
            .map(|id| self.lock_persistent().contains_key(id))
            .unwrap_or(false);

        session.in_use.store(false, Ordering::SeqCst);

        if kept {
            return Ok(());
        }

        self.driver
            .close_page(session.debug_port, &session.target_id)
            .await
    }

    /// Destroys a persistent session
    ///
    /// # Arguments
    ///
    /// * `session_id` - Id the session was acquired under
    ///
    /// # Returns
    ///
    /// `false` if no session exists for `session_id`
    pub async fn close_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let removed = self.lock_persistent().remove(session_id);
        match removed {
            Some(session) => {
                session.in_use.store(false, Ordering::SeqCst);
                self.driver
                    .close_page(session.debug_port, &session.target_id)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Runs the before-navigate observers for a session
    pub fn before_navigate(&self, session: &PageSession, url: &Url) -> Vec<ObserverOutcome> {
        self.observers
            .notify(LifecyclePoint::BeforeNavigate, session, Some((url, true)))
    }

    /// Runs the after-navigate observers for a session
    pub fn after_navigate(
        &self,
        session: &PageSession,
        url: &Url,
        succeeded: bool,
    ) -> Vec<ObserverOutcome> {
        self.observers
            .notify(LifecyclePoint::AfterNavigate, session, Some((url, succeeded)))
    }

    /// Detects crashed browsers and returns how many are still ready
    ///
    /// A process found dead is marked `Failed`, cleaned up, then marked
    /// `Terminated`. Persistent sessions bound to it are dropped. Processes
    /// still `Starting` are left alone.
    ///
    /// # Returns
    ///
    /// The number of `Ready` processes after the check
    pub async fn check_health(&self) -> usize {
        let mut processes = self.processes.lock().await;
        let mut dead_ports = Vec::new();

        for process in processes.iter_mut() {
            if process.info.status != ProcessStatus::Ready {
                continue;
            }
            let mut handle = process.handle.lock().await;
            if handle.is_alive() {
                continue;
            }

            process.info.status = ProcessStatus::Failed;
            tracing::error!(
                "Browser on port {} crashed: {}",
                process.info.debug_port,
                truncate_diagnostic(&handle.captured_output())
            );

            if let Err(e) = handle.kill().await {
                tracing::warn!("Failed to reap crashed browser: {}", e);
            }
            process.info.status = ProcessStatus::Terminated;
            dead_ports.push(process.info.debug_port);
        }

        if !dead_ports.is_empty() {
            self.lock_persistent()
                .retain(|_, session| !dead_ports.contains(&session.debug_port));
        }

        processes
            .iter()
            .filter(|p| p.info.status == ProcessStatus::Ready)
            .count()
    }

    /// Snapshots of every process the pool has launched
    ///
    /// Processes that failed startup or crashed stay listed as `Terminated`.
    pub async fn processes(&self) -> Vec<BrowserProcess> {
        self.processes
            .lock()
            .await
            .iter()
            .map(|p| p.info.clone())
            .collect()
    }

    /// Number of live persistent sessions
    ///
    /// # Returns
    ///
    /// Sessions created under a session id and not yet closed or lost to a crash
    pub fn persistent_count(&self) -> usize {
        self.lock_persistent().len()
    }

    /// Terminates every process and drops every session
    ///
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sessions: Vec<PageSession> = self.lock_persistent().drain().map(|(_, s)| s).collect();
        for session in sessions {
            if let Err(e) = self
                .driver
                .close_page(session.debug_port, &session.target_id)
                .await
            {
                tracing::debug!("Ignoring close failure during shutdown: {}", e);
            }
        }

        let mut processes = self.processes.lock().await;
        for process in processes.iter_mut() {
            if process.info.status == ProcessStatus::Terminated {
                continue;
            }
            if let Err(e) = process.handle.lock().await.kill().await {
                tracing::warn!("Failed to terminate browser on port {}: {}", process.info.debug_port, e);
            }
            process.info.status = ProcessStatus::Terminated;
        }

        tracing::info!("Session pool shut down");
        Ok(())
    }

    async fn set_status(&self, slot: usize, status: ProcessStatus) {
        if let Some(process) = self.processes.lock().await.get_mut(slot) {
            process.info.status = status;
        }
    }

    fn persistent_session(&self, session_id: &str) -> Option<PageSession> {
        let sessions = self.lock_persistent();
        let session = sessions.get(session_id)?;
        session.in_use.store(true, Ordering::SeqCst);
        Some(session.clone())
    }

    fn lock_persistent(&self) -> std::sync::MutexGuard<'_, HashMap<String, PageSession>> {
        self.persistent.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Debug port of the first healthy process
    async fn ready_port(&self) -> Result<u16, SessionError> {
        let mut processes = self.processes.lock().await;

        if processes.is_empty() {
            return Err(SessionError::SessionCreationFailed {
                reason: "no browser has been launched".to_string(),
            });
        }

        for process in processes.iter_mut() {
            if process.info.status == ProcessStatus::Ready
                && !process.handle.lock().await.is_alive()
            {
                tracing::error!("Browser on port {} is no longer running", process.info.debug_port);
                process.info.status = ProcessStatus::Failed;
            }
        }

        if let Some(ready) = processes
            .iter()
            .find(|p| p.info.status == ProcessStatus::Ready)
        {
            return Ok(ready.info.debug_port);
        }

        if processes
            .iter()
            .any(|p| p.info.status == ProcessStatus::Starting)
        {
            return Err(SessionError::SessionCreationFailed {
                reason: "browser is still starting".to_string(),
            });
        }

        Err(SessionError::NoHealthyBrowser)
    }
}
