//! Integration tests for the session pool and the HTTP page fetcher

mod common;

use common::FakeDriver;
use gleaner::config::BrowserConfig;
use gleaner::crawler::{FetchError, HttpPageFetcher, PageFetcher};
use gleaner::session::{
    ObserverError, PageSession, ProcessStatus, ProxyProfile, SessionError, SessionObserver,
    SessionPool, StealthProfile, Viewport, DIAGNOSTIC_LIMIT,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_browser() -> BrowserConfig {
    BrowserConfig {
        startup_checks_ms: vec![1, 5, 10],
        ..BrowserConfig::default()
    }
}

async fn launched_pool(driver: Arc<FakeDriver>) -> SessionPool {
    let pool = SessionPool::new(driver);
    pool.launch(&fast_browser()).await.unwrap();
    pool
}

// ===== Session pool =====

#[tokio::test]
async fn test_page_creation_is_serialized() {
    let driver = Arc::new(FakeDriver::healthy().with_create_delay(Duration::from_millis(10)));
    let pool = Arc::new(launched_pool(Arc::clone(&driver)).await);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        tasks.push(tokio::spawn(async move {
            pool.acquire_page(None, None, None).await.unwrap()
        }));
    }

    let mut targets = HashSet::new();
    for task in tasks {
        targets.insert(task.await.unwrap().target_id);
    }

    assert_eq!(targets.len(), 8);
    assert_eq!(driver.max_concurrent_creates(), 1);
}

#[tokio::test]
async fn test_startup_crash_carries_truncated_diagnostic() {
    let output = format!("FATAL: cannot open display\n{}", "x".repeat(500));
    let driver = Arc::new(FakeDriver::crashing(output));
    let pool = SessionPool::new(driver);

    match pool.launch(&fast_browser()).await {
        Err(SessionError::BrowserStartupFailed { diagnostic }) => {
            assert!(diagnostic.starts_with("FATAL: cannot open display"));
            assert_eq!(diagnostic.chars().count(), DIAGNOSTIC_LIMIT);
        }
        other => panic!("expected startup failure, got {:?}", other.map(|p| p.pid)),
    }
}

#[tokio::test]
async fn test_unanswered_control_socket_fails_startup() {
    let driver = Arc::new(FakeDriver::unresponsive("DevTools listening failed"));
    let pool = SessionPool::new(driver.clone());

    let result = pool.launch(&fast_browser()).await;

    assert!(matches!(
        result,
        Err(SessionError::BrowserStartupFailed { ref diagnostic }) if diagnostic == "DevTools listening failed"
    ));
    assert_eq!(pool.check_health().await, 0);
}

#[tokio::test]
async fn test_launch_flags_keep_proxy_credentials_out() {
    let driver = Arc::new(FakeDriver::healthy());
    let proxy = ProxyProfile::new("http://proxy.internal:3128").with_credentials("crawler", "s3cret");
    let pool = SessionPool::new(driver.clone()).with_proxy(Some(proxy));

    let browser = BrowserConfig {
        flags: vec![
            "--window-size=1280,800".to_string(),
            "--proxy-server=http://elsewhere:1".to_string(),
        ],
        ..fast_browser()
    };
    pool.launch(&browser).await.unwrap();

    let flags = driver.spawned.lock().unwrap()[0].flags.clone();
    assert!(flags.contains(&"--proxy-server=http://proxy.internal:3128".to_string()));
    assert!(flags.contains(&"--window-size=1280,800".to_string()));
    assert!(!flags.iter().any(|f| f.contains("elsewhere")));
    assert!(!flags.iter().any(|f| f.contains("s3cret") || f.contains("crawler")));
}

#[tokio::test]
async fn test_page_gets_stealth_identity_and_proxy_credentials() {
    let driver = Arc::new(FakeDriver::healthy());
    let proxy = ProxyProfile::new("http://proxy.internal:3128").with_credentials("crawler", "s3cret");
    let stealth = StealthProfile {
        user_agent: Some("Mozilla/5.0 (Gleaner test)".to_string()),
        viewport: Some(Viewport {
            width: 1920,
            height: 1080,
        }),
    };
    let pool = SessionPool::new(driver.clone())
        .with_proxy(Some(proxy))
        .with_stealth_profiles(vec![stealth]);
    pool.launch(&fast_browser()).await.unwrap();

    let session = pool.acquire_page(None, None, None).await.unwrap();

    let configured = driver.configured_pages();
    assert_eq!(configured.len(), 1);
    let (target, setup) = &configured[0];
    assert_eq!(target, &session.target_id);
    assert_eq!(setup.user_agent, "Mozilla/5.0 (Gleaner test)");
    assert_eq!(setup.viewport.width, 1920);
    assert_eq!(
        setup.proxy.as_ref().and_then(|p| p.credentials()),
        Some(("crawler", "s3cret"))
    );
    assert_eq!(session.viewport, setup.viewport);
}

#[tokio::test]
async fn test_browser_reported_as_starting_until_checks_pass() {
    let driver = Arc::new(FakeDriver::unresponsive("still booting"));
    let pool = Arc::new(SessionPool::new(driver.clone()));
    let browser = BrowserConfig {
        startup_checks_ms: vec![100, 200],
        ..BrowserConfig::default()
    };

    let launching = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.launch(&browser).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let snapshot = pool.processes().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].status, ProcessStatus::Starting);
    match pool.acquire_page(None, None, None).await {
        Err(SessionError::SessionCreationFailed { reason }) => assert!(reason.contains("starting")),
        other => panic!("expected creation failure, got {:?}", other.map(|s| s.id)),
    }

    assert!(matches!(
        launching.await.unwrap(),
        Err(SessionError::BrowserStartupFailed { .. })
    ));
    assert_eq!(pool.processes().await[0].status, ProcessStatus::Terminated);
}

#[tokio::test]
async fn test_persistent_session_reused_until_closed() {
    let driver = Arc::new(FakeDriver::healthy());
    let pool = launched_pool(Arc::clone(&driver)).await;

    let first = pool.acquire_page(None, None, Some("login")).await.unwrap();
    let target = first.target_id.clone();
    pool.release_page(first).await.unwrap();

    assert!(driver.closed_targets().is_empty());
    assert_eq!(pool.persistent_count(), 1);

    let again = pool.acquire_page(None, None, Some("login")).await.unwrap();
    assert_eq!(again.target_id, target);
    assert!(again.is_in_use());
    pool.release_page(again).await.unwrap();

    assert!(pool.close_session("login").await.unwrap());
    assert!(!pool.close_session("login").await.unwrap());
    assert_eq!(driver.closed_targets(), vec![target]);
    assert_eq!(pool.persistent_count(), 0);
}

#[tokio::test]
async fn test_transient_session_closed_on_release() {
    let driver = Arc::new(FakeDriver::healthy());
    let pool = launched_pool(Arc::clone(&driver)).await;

    let session = pool.acquire_page(None, None, None).await.unwrap();
    let target = session.target_id.clone();
    pool.release_page(session).await.unwrap();

    assert_eq!(driver.closed_targets(), vec![target]);
}

#[tokio::test]
async fn test_crashed_browser_leaves_no_healthy_process() {
    let driver = Arc::new(FakeDriver::healthy());
    let pool = launched_pool(Arc::clone(&driver)).await;
    pool.acquire_page(None, None, Some("kept")).await.unwrap();

    driver.crash();

    assert!(matches!(
        pool.acquire_page(None, None, None).await,
        Err(SessionError::NoHealthyBrowser)
    ));
    assert_eq!(pool.check_health().await, 0);
}

#[tokio::test]
async fn test_health_check_drops_sessions_of_crashed_browser() {
    let driver = Arc::new(FakeDriver::healthy());
    let pool = launched_pool(Arc::clone(&driver)).await;
    pool.acquire_page(None, None, Some("kept")).await.unwrap();
    assert_eq!(pool.check_health().await, 1);

    driver.crash();

    assert_eq!(pool.check_health().await, 0);
    assert_eq!(pool.persistent_count(), 0);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let driver = Arc::new(FakeDriver::healthy());
    let pool = launched_pool(Arc::clone(&driver)).await;
    pool.acquire_page(None, None, Some("kept")).await.unwrap();

    pool.shutdown().await.unwrap();
    pool.shutdown().await.unwrap();

    assert_eq!(driver.closed_targets().len(), 1);
    assert!(matches!(
        pool.acquire_page(None, None, None).await,
        Err(SessionError::SessionCreationFailed { .. })
    ));
}

struct FailingObserver;

impl SessionObserver for FailingObserver {
    fn name(&self) -> &str {
        "failing"
    }

    fn before_navigate(&self, _session: &PageSession, _url: &Url) -> Result<(), ObserverError> {
        Err("hook exploded".into())
    }
}

#[derive(Default)]
struct CountingObserver {
    calls: AtomicUsize,
}

impl SessionObserver for CountingObserver {
    fn name(&self) -> &str {
        "counting"
    }

    fn before_navigate(&self, _session: &PageSession, _url: &Url) -> Result<(), ObserverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_failing_observer_does_not_skip_others() {
    let counting = Arc::new(CountingObserver::default());
    let pool = SessionPool::new(Arc::new(FakeDriver::healthy()))
        .with_observer(Arc::new(FailingObserver))
        .with_observer(Arc::clone(&counting) as Arc<dyn SessionObserver>);
    pool.launch(&fast_browser()).await.unwrap();

    let session = pool.acquire_page(None, None, None).await.unwrap();
    let url = Url::parse("https://site.test/").unwrap();
    let outcomes = pool.before_navigate(&session, &url);

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].observer, "failing");
    assert_eq!(outcomes[0].error.as_deref(), Some("hook exploded"));
    assert!(outcomes[1].is_ok());
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
}

// ===== HTTP page fetcher =====

fn fetcher() -> HttpPageFetcher {
    HttpPageFetcher::new(Duration::from_millis(500), Duration::ZERO)
}

#[tokio::test]
async fn test_fetch_parses_title_and_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="/products">Products</a>
                    <a href="/about#team">About</a>
                    <a href="mailto:hi@site.test">Mail</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/", server.uri())).unwrap();
    let page = fetcher()
        .fetch(&PageSession::detached("t1"), &url)
        .await
        .unwrap();

    assert_eq!(page.status, 200);
    assert_eq!(page.title.as_deref(), Some("Home"));
    let paths: Vec<&str> = page.links.iter().map(|l| l.path()).collect();
    assert_eq!(paths, vec!["/products", "/about"]);
}

#[tokio::test]
async fn test_fetch_maps_forbidden_to_bot_detection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let result = fetcher().fetch(&PageSession::detached("t1"), &url).await;

    assert!(matches!(result, Err(FetchError::BotDetected(_))));
}

#[tokio::test]
async fn test_fetch_maps_too_many_requests_to_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let result = fetcher().fetch(&PageSession::detached("t1"), &url).await;

    assert!(matches!(result, Err(FetchError::RateLimited(_))));
}

#[tokio::test]
async fn test_fetch_detects_challenge_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Just a moment...</title></head></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let result = fetcher().fetch(&PageSession::detached("t1"), &url).await;

    assert!(matches!(result, Err(FetchError::BotDetected(_))));
}

#[tokio::test]
async fn test_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&server.uri()).unwrap();
    let fetcher = HttpPageFetcher::new(Duration::from_millis(100), Duration::ZERO);
    let result = fetcher.fetch(&PageSession::detached("t1"), &url).await;

    assert!(matches!(result, Err(FetchError::Timeout(_))));
}
