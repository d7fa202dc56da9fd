//! Chrome/Chromium driver built on chromiumoxide

use crate::session::driver::{BrowserDriver, LaunchSpec, PageSetup, PageTarget, ProcessHandle};
use crate::session::SessionError;
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams as FetchEnableParams, EventAuthRequired,
    EventRequestPaused,
};
use chromiumoxide::{Handler, Page};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Cap on retained process output
const OUTPUT_BUFFER_LIMIT: usize = 8 * 1024;

const WELL_KNOWN_PATHS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

const PATH_NAMES: &[&str] = &["chromium", "chromium-browser", "google-chrome", "chrome"];

/// Finds a browser executable
///
/// The configured path wins, then `CHROMIUM_PATH`, then a fixed list of
/// install locations, then a `PATH` lookup.
pub fn discover_browser(configured: Option<&Path>) -> Result<PathBuf, SessionError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(SessionError::Driver(format!(
            "configured browser executable {} does not exist",
            path.display()
        )));
    }

    if let Ok(env_path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!("CHROMIUM_PATH points to missing file {}", path.display());
    }

    if let Some(path) = WELL_KNOWN_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(path);
    }

    PATH_NAMES
        .iter()
        .find_map(|name| which_binary(name))
        .ok_or_else(|| {
            SessionError::Driver(
                "no Chrome/Chromium executable found; set browser.executable or CHROMIUM_PATH"
                    .to_string(),
            )
        })
}

fn which_binary(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// A control connection to one browser
struct Connection {
    browser: Browser,
    handler: JoinHandle<()>,
}

/// A page opened by this driver, plus the tasks answering its events
struct OpenPage {
    page: Page,
    listeners: Vec<JoinHandle<()>>,
}

/// Drives a local Chrome through `--remote-debugging-port`
///
/// The process is spawned directly so its output can be captured for
/// startup diagnostics; everything after that goes over a chromiumoxide
/// connection to the debug port.
pub struct ChromeDriver {
    host: String,
    connections: tokio::sync::Mutex<HashMap<u16, Connection>>,
    pages: Mutex<HashMap<String, OpenPage>>,
}

impl ChromeDriver {
    /// Targets browsers listening on the loopback interface
    ///
    /// Nothing is connected until `check_endpoint` first succeeds for a port.
    pub fn new() -> Self {
        Self::with_host("127.0.0.1")
    }

    /// Targets a debug endpoint on another host
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            connections: tokio::sync::Mutex::new(HashMap::new()),
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// The page behind a target id, if this driver opened it and it is still open
    ///
    /// # Arguments
    ///
    /// * `target_id` - Target id returned by `create_page`
    ///
    /// # Returns
    ///
    /// A handle sharing the page's connection; `None` once the page is closed
    pub fn page(&self, target_id: &str) -> Option<Page> {
        self.lock_pages().get(target_id).map(|open| open.page.clone())
    }

    fn endpoint(&self, debug_port: u16) -> String {
        format!("http://{}:{}", self.host, debug_port)
    }

    fn lock_pages(&self) -> std::sync::MutexGuard<'_, HashMap<String, OpenPage>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChromeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        for (_, open) in self.lock_pages().drain() {
            open.listeners.iter().for_each(JoinHandle::abort);
        }
        for (_, connection) in self.connections.get_mut().drain() {
            connection.handler.abort();
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessHandle>, SessionError> {
        tracing::debug!("Spawning {} with flags {:?}", spec.executable.display(), spec.flags);

        let mut child = Command::new(&spec.executable)
            .args(&spec.flags)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = Arc::new(Mutex::new(String::new()));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture_output(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture_output(stderr, Arc::clone(&output)));
        }

        Ok(Box::new(ChromeProcess { child, output }))
    }

    async fn check_endpoint(&self, debug_port: u16) -> Result<(), SessionError> {
        let mut connections = self.connections.lock().await;

        match connections.get(&debug_port) {
            Some(existing) if !existing.handler.is_finished() => return Ok(()),
            Some(_) => {
                tracing::debug!("Control connection on port {} went away, reconnecting", debug_port);
                connections.remove(&debug_port);
            }
            None => {}
        }

        let (browser, handler) = Browser::connect(self.endpoint(debug_port))
            .await
            .map_err(|e| SessionError::Driver(format!("control socket not answering: {}", e)))?;

        connections.insert(
            debug_port,
            Connection {
                browser,
                handler: spawn_handler(handler),
            },
        );
        Ok(())
    }

    async fn create_page(&self, debug_port: u16) -> Result<PageTarget, SessionError> {
        let connections = self.connections.lock().await;
        let connection = connections.get(&debug_port).ok_or_else(|| {
            SessionError::Driver(format!("no control connection on port {}", debug_port))
        })?;

        let page = connection
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Driver(format!("page creation failed: {}", e)))?;

        let id = page.target_id().inner().clone();
        self.lock_pages().insert(
            id.clone(),
            OpenPage {
                page,
                listeners: Vec::new(),
            },
        );

        Ok(PageTarget { id })
    }

    async fn configure_page(
        &self,
        _debug_port: u16,
        target_id: &str,
        setup: &PageSetup,
    ) -> Result<(), SessionError> {
        let page = self
            .page(target_id)
            .ok_or_else(|| SessionError::Driver(format!("target {} is not open", target_id)))?;

        let user_agent = SetUserAgentOverrideParams::builder()
            .user_agent(setup.user_agent.clone())
            .build()
            .map_err(SessionError::Driver)?;
        page.execute(user_agent)
            .await
            .map_err(|e| SessionError::Driver(format!("user agent override failed: {}", e)))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(setup.viewport.width))
            .height(i64::from(setup.viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(SessionError::Driver)?;
        page.execute(metrics)
            .await
            .map_err(|e| SessionError::Driver(format!("viewport override failed: {}", e)))?;

        if let Some((username, password)) = setup.proxy.as_ref().and_then(|p| p.credentials()) {
            let listeners = answer_proxy_auth(&page, username, password).await?;
            match self.lock_pages().get_mut(target_id) {
                Some(open) => open.listeners.extend(listeners),
                None => listeners.iter().for_each(JoinHandle::abort),
            }
        }

        Ok(())
    }

    async fn close_page(&self, _debug_port: u16, target_id: &str) -> Result<(), SessionError> {
        let Some(open) = self.lock_pages().remove(target_id) else {
            tracing::debug!("Target {} already closed", target_id);
            return Ok(());
        };

        open.listeners.iter().for_each(JoinHandle::abort);
        open.page
            .close()
            .await
            .map_err(|e| SessionError::Driver(format!("closing target {} failed: {}", target_id, e)))
    }
}

/// Drives the connection's event loop until the browser goes away
fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // chromiumoxide cannot decode every event newer browsers emit
                if message.contains("data did not match any variant")
                    || message.contains("Failed to deserialize WS response")
                {
                    tracing::trace!("Ignoring undecodable browser event: {}", message);
                } else {
                    tracing::warn!("Browser connection error: {}", message);
                }
            }
        }
        tracing::debug!("Browser connection closed");
    })
}

/// Intercepts the page's requests so proxy auth challenges can be answered
///
/// With interception on, every request pauses until continued, so one task
/// resumes paused requests and another answers `Fetch.authRequired` with the
/// proxy credentials.
async fn answer_proxy_auth(
    page: &Page,
    username: &str,
    password: &str,
) -> Result<Vec<JoinHandle<()>>, SessionError> {
    let listen_error = |e: chromiumoxide::error::CdpError| {
        SessionError::Driver(format!("failed to listen for proxy auth: {}", e))
    };
    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(listen_error)?;
    let mut challenges = page
        .event_listener::<EventAuthRequired>()
        .await
        .map_err(listen_error)?;

    page.execute(FetchEnableParams::builder().handle_auth_requests(true).build())
        .await
        .map_err(|e| SessionError::Driver(format!("enabling request interception failed: {}", e)))?;

    let resume_page = page.clone();
    let resumer = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let resume = ContinueRequestParams::new(event.request_id.clone());
            if let Err(e) = resume_page.execute(resume).await {
                tracing::debug!("Failed to resume paused request: {}", e);
            }
        }
    });

    let auth_page = page.clone();
    let (username, password) = (username.to_string(), password.to_string());
    let answerer = tokio::spawn(async move {
        while let Some(event) = challenges.next().await {
            let response = AuthChallengeResponse {
                response: AuthChallengeResponseResponse::ProvideCredentials,
                username: Some(username.clone()),
                password: Some(password.clone()),
            };
            let answer = ContinueWithAuthParams::new(event.request_id.clone(), response);
            if let Err(e) = auth_page.execute(answer).await {
                tracing::warn!("Failed to answer proxy auth challenge: {}", e);
            }
        }
    });

    Ok(vec![resumer, answerer])
}

async fn capture_output<R>(reader: R, buffer: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut buf = buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buf.len() < OUTPUT_BUFFER_LIMIT {
            buf.push_str(&line);
            buf.push('\n');
        }
    }
}

struct ChromeProcess {
    child: Child,
    output: Arc<Mutex<String>>,
}

#[async_trait]
impl ProcessHandle for ChromeProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn captured_output(&self) -> String {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn kill(&mut self) -> Result<(), SessionError> {
        if self.is_alive() {
            self.child.kill().await?;
        }
        Ok(())
    }
}
