//! Fetching through the session's own browser page

use crate::crawler::fetcher::{check_challenge, check_status, FetchError, FetchedPage, PageFetcher};
use crate::crawler::parser::parse_page;
use crate::session::{ChromeDriver, PageSession};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Navigates the page behind each session and reads the rendered document
///
/// The page already carries the session's user agent, viewport and proxy
/// authentication, applied by the pool when the session was created.
pub struct BrowserPageFetcher {
    driver: Arc<ChromeDriver>,
    page_timeout: Duration,
    settle_delay: Duration,
}

impl BrowserPageFetcher {
    /// Creates a fetcher over the pages opened by `driver`
    ///
    /// # Arguments
    ///
    /// * `driver` - The driver the session pool creates pages with
    /// * `page_timeout` - Limit on navigation plus load, per attempt
    /// * `settle_delay` - Pause after load before the document is read
    pub fn new(driver: Arc<ChromeDriver>, page_timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            driver,
            page_timeout,
            settle_delay,
        }
    }

    async fn attempt(&self, page: &Page, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(navigation_error)?;

        match tokio::time::timeout(self.page_timeout, navigate(page, url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout(format!(
                    "page load exceeded {}ms",
                    self.page_timeout.as_millis()
                )))
            }
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let final_url = page
            .url()
            .await
            .map_err(navigation_error)?
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());

        // Documents served without a network response (cache, about:) count as 200
        let status = last_document_status(&mut responses).unwrap_or(200);
        check_status(status, &final_url)?;

        let html = page.content().await.map_err(navigation_error)?;
        let parsed = parse_page(&html, &final_url);
        check_challenge(parsed.title.as_deref(), &final_url)?;

        Ok(FetchedPage {
            final_url,
            status,
            title: parsed.title,
            links: parsed.links,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserPageFetcher {
    async fn fetch(&self, session: &PageSession, url: &Url) -> Result<FetchedPage, FetchError> {
        let page = self.driver.page(&session.target_id).ok_or_else(|| {
            FetchError::Other(format!("page {} is not open", session.target_id))
        })?;

        tracing::trace!(
            "Navigating target {} as '{}' to {}",
            session.target_id,
            session.user_agent,
            url
        );
        self.attempt(&page, url).await
    }
}

async fn navigate(page: &Page, url: &Url) -> Result<(), FetchError> {
    page.goto(url.as_str()).await.map_err(navigation_error)?;
    page.wait_for_navigation().await.map_err(navigation_error)?;
    Ok(())
}

/// Status of the last document response already delivered to `events`
///
/// Redirects produce one document response per hop, so the last one wins.
fn last_document_status(events: &mut EventStream<EventResponseReceived>) -> Option<u16> {
    let mut status = None;
    while let Some(Some(event)) = events.next().now_or_never() {
        if event.r#type == ResourceType::Document {
            status = u16::try_from(event.response.status).ok();
        }
    }
    status
}

/// Browser errors carry Chrome's own net error text, which `classify` understands
fn navigation_error(e: CdpError) -> FetchError {
    match e {
        CdpError::Timeout => FetchError::Timeout("browser request timed out".to_string()),
        other => FetchError::from_message(other.to_string()),
    }
}
