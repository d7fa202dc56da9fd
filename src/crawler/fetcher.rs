//! Page fetching
//!
//! The scheduler only sees a [`PageFetcher`]: something that turns a page
//! session and a URL into either a [`FetchedPage`] or a typed
//! [`FetchError`]. [`BrowserPageFetcher`](crate::crawler::BrowserPageFetcher)
//! navigates the session's own page; [`HttpPageFetcher`] is the plain-HTTP
//! fallback, which honors the session's user agent and proxy but never
//! touches the browser. Both enforce the attempt-level page timeout.

use crate::crawler::parser::parse_page;
use crate::crawler::retry::{classify, ErrorCategory};
use crate::session::PageSession;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A failed fetch attempt, typed by category
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch timed out: {0}")]
    Timeout(String),

    #[error("bot detection: {0}")]
    BotDetected(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("fetch failed: {0}")]
    Other(String),
}

impl FetchError {
    /// Builds the error variant that `classify` assigns to `message`
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::from_category(classify(&message), message)
    }

    /// Wraps `message` in the variant for `category`
    pub fn from_category(category: ErrorCategory, message: String) -> Self {
        match category {
            ErrorCategory::BotDetection => Self::BotDetected(message),
            ErrorCategory::RateLimit => Self::RateLimited(message),
            ErrorCategory::Timeout => Self::Timeout(message),
            ErrorCategory::Network => Self::Network(message),
            ErrorCategory::Other => Self::Other(message),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::BotDetected(_) => ErrorCategory::BotDetection,
            Self::RateLimited(_) => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m)
            | Self::BotDetected(m)
            | Self::RateLimited(m)
            | Self::Network(m)
            | Self::Other(m) => m,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {}", e))
        } else {
            Self::from_message(e.to_string())
        }
    }
}

/// A successfully fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub title: Option<String>,
    /// Outbound links, absolute
    pub links: Vec<Url>,
}

/// Performs one fetch attempt for a page session
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, session: &PageSession, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Titles of interstitial challenge pages served instead of content
const CHALLENGE_TITLES: &[&str] = &["just a moment", "attention required", "access denied"];

/// Maps a document's HTTP status to the fetch error it signals, if any
///
/// # Arguments
///
/// * `status` - Status of the main document response
/// * `final_url` - URL the response came from, for the error message
pub(crate) fn check_status(status: u16, final_url: &Url) -> Result<(), FetchError> {
    match status {
        403 => Err(FetchError::BotDetected(format!("HTTP 403 Forbidden from {}", final_url))),
        429 => Err(FetchError::RateLimited(format!("HTTP 429 from {}", final_url))),
        s if !(200..300).contains(&s) => {
            Err(FetchError::from_message(format!("HTTP {} from {}", s, final_url)))
        }
        _ => Ok(()),
    }
}

/// Rejects interstitial challenge pages served in place of content
pub(crate) fn check_challenge(title: Option<&str>, final_url: &Url) -> Result<(), FetchError> {
    let Some(title) = title else {
        return Ok(());
    };
    let lowered = title.to_lowercase();
    if CHALLENGE_TITLES.iter().any(|t| lowered.contains(t)) {
        return Err(FetchError::BotDetected(format!(
            "challenge page '{}' served for {}",
            title, final_url
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    user_agent: String,
    proxy: Option<String>,
    username: Option<String>,
}

/// Fetches pages over plain HTTP with per-session identity
///
/// Used when `browser.fetch-mode = "http"`; pages are never rendered.
pub struct HttpPageFetcher {
    page_timeout: Duration,
    settle_delay: Duration,
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl HttpPageFetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `page_timeout` - Limit on one request, body included
    /// * `settle_delay` - Pause after the body arrives, before parsing
    pub fn new(page_timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            page_timeout,
            settle_delay,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a client matching the session's user agent and proxy
    fn client_for(&self, session: &PageSession) -> Result<Client, FetchError> {
        let key = ClientKey {
            user_agent: session.user_agent.clone(),
            proxy: session.proxy.as_ref().map(|p| p.server.clone()),
            username: session.proxy.as_ref().and_then(|p| p.username.clone()),
        };

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .user_agent(session.user_agent.as_str())
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true);

        if let Some(profile) = &session.proxy {
            let mut proxy = Proxy::all(profile.server.as_str())
                .map_err(|e| FetchError::Other(format!("invalid proxy {}: {}", profile.server, e)))?;
            if let Some((user, pass)) = profile.credentials() {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn attempt(&self, client: &Client, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = client.get(url.clone()).send().await?;
        let status = response.status();
        let final_url = response.url().clone();
        check_status(status.as_u16(), &final_url)?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        if !content_type.contains("html") {
            return Err(FetchError::Other(format!(
                "unsupported content type '{}'",
                content_type
            )));
        }

        let body = response.text().await?;

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let parsed = parse_page(&body, &final_url);
        check_challenge(parsed.title.as_deref(), &final_url)?;

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            title: parsed.title,
            links: parsed.links,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, session: &PageSession, url: &Url) -> Result<FetchedPage, FetchError> {
        let client = self.client_for(session)?;

        match tokio::time::timeout(self.page_timeout, self.attempt(&client, url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(format!(
                "page load exceeded {}ms",
                self.page_timeout.as_millis()
            ))),
        }
    }
}
