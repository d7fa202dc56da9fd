//! Integration tests for the crawler
//!
//! These drive the full coordinator against a fake browser and a scripted
//! fetcher, so every run is deterministic and needs no network.

mod common;

use common::{test_config, FakeDriver, ScriptedFetcher};
use gleaner::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use gleaner::crawler::{Coordinator, ErrorCategory, FetchError, MAX_CONSECUTIVE_CREATION_FAILURES};
use gleaner::output::UrlOutcome;
use gleaner::session::SessionPool;
use gleaner::{Config, CrawlBudget, GleanerError, RunState};
use std::sync::Arc;
use tempfile::TempDir;

fn coordinator(config: Config, driver: Arc<FakeDriver>, fetcher: Arc<ScriptedFetcher>) -> Coordinator {
    let pool = Arc::new(SessionPool::new(driver));
    Coordinator::new(config, "test-hash", pool, fetcher)
}

fn seeds(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

#[tokio::test]
async fn test_denied_link_is_never_fetched() {
    let config = test_config(3, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page(
                "https://site.test/",
                &["https://site.test/products", "https://site.test/blog/launch"],
            )
            .page("https://site.test/products", &[]),
    );
    let driver = Arc::new(FakeDriver::healthy());
    let coordinator = coordinator(config, Arc::clone(&driver), Arc::clone(&fetcher));

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        fetcher.attempts(),
        vec!["https://site.test/", "https://site.test/products"]
    );
    assert_eq!(report.stats.pages_fetched, 2);
    assert_eq!(report.stats.links_denied, 1);
    assert!(report.unprocessed.is_empty());
    assert_eq!(driver.spawn_count(), 1);
}

#[tokio::test]
async fn test_allow_matches_are_fetched_first() {
    let config = test_config(10, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new().page(
        "https://site.test/",
        &["https://site.test/misc", "https://site.test/pricing"],
    ));
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));

    coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(
        fetcher.attempts(),
        vec![
            "https://site.test/",
            "https://site.test/pricing",
            "https://site.test/misc"
        ]
    );
}

#[tokio::test]
async fn test_aborted_fetch_retries_then_fails_as_bot_detection() {
    let config = test_config(5, 1);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new().fail(
        "https://site.test/",
        FetchError::from_message("net::ERR_ABORTED at https://site.test/"),
    ));
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(fetcher.attempts_for("https://site.test/"), 2);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.errors.bot_detection, 2);
    assert_eq!(report.errors.rate_limit, 0);

    match &report.outcomes[..] {
        [UrlOutcome::Failure {
            category, attempts, ..
        }] => {
            assert_eq!(*category, ErrorCategory::BotDetection);
            assert_eq!(*attempts, 2);
        }
        other => panic!("unexpected outcomes: {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let config = test_config(5, 2);
    let budget = config.budget.clone();

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .respond(
                "https://site.test/",
                Err(FetchError::Timeout("page load exceeded 30000ms".to_string())),
            )
            .page("https://site.test/", &[]),
    );
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(fetcher.attempts_for("https://site.test/"), 2);
    assert_eq!(report.stats.pages_fetched, 1);
    assert_eq!(report.stats.retries_scheduled, 1);
    assert_eq!(report.errors.timeout, 1);
    assert_eq!(report.outcomes[0].attempts(), 2);
}

#[tokio::test]
async fn test_bot_detection_below_threshold_keeps_running() {
    let config = test_config(10, 0);
    let budget = config.budget.clone();

    let urls = ["https://site.test/a", "https://site.test/b", "https://site.test/c", "https://site.test/d"];
    let mut fetcher = ScriptedFetcher::new();
    for url in urls {
        fetcher = fetcher.fail(url, FetchError::BotDetected("HTTP 403 Forbidden".to_string()));
    }
    let fetcher = Arc::new(fetcher.page("https://site.test/e", &[]));
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));

    let mut all = seeds(&urls);
    all.push("https://site.test/e".to_string());
    let report = coordinator.run(all, budget, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.errors.bot_detection, 4);
    assert!(report.stop_reason.is_none());
    assert_eq!(fetcher.attempts().len(), 5);
}

#[tokio::test]
async fn test_fifth_bot_detection_stops_the_run() {
    let config = test_config(10, 0);
    let budget = config.budget.clone();

    let urls = [
        "https://site.test/a",
        "https://site.test/b",
        "https://site.test/c",
        "https://site.test/d",
        "https://site.test/e",
        "https://site.test/f",
    ];
    let mut fetcher = ScriptedFetcher::new();
    for url in urls {
        fetcher = fetcher.fail(url, FetchError::BotDetected("HTTP 403 Forbidden".to_string()));
    }
    let fetcher = Arc::new(fetcher);
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));

    let report = coordinator.run(seeds(&urls), budget, false).await.unwrap();

    assert_eq!(report.state, RunState::Stopped);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stop_reason.map(|r| r.key()), Some("bot_detection"));
    assert_eq!(fetcher.attempts().len(), 5);
    assert_eq!(report.unprocessed, vec!["https://site.test/f".to_string()]);
}

#[tokio::test]
async fn test_invalid_budget_rejected_before_any_fetch() {
    let config = test_config(5, 0);
    let mut budget = config.budget.clone();
    budget.max_pages = 0;

    let fetcher = Arc::new(ScriptedFetcher::new());
    let driver = Arc::new(FakeDriver::healthy());
    let coordinator = coordinator(config, Arc::clone(&driver), Arc::clone(&fetcher));

    let result = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await;

    assert!(matches!(result, Err(GleanerError::Config(_))));
    assert!(fetcher.attempts().is_empty());
    assert_eq!(driver.spawn_count(), 0);
}

#[tokio::test]
async fn test_browser_startup_failure_fails_the_run() {
    let config = test_config(5, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let driver = Arc::new(FakeDriver::crashing("error while loading shared libraries"));
    let coordinator = coordinator(config, driver, Arc::clone(&fetcher));

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.failure.unwrap().contains("shared libraries"));
    assert!(fetcher.attempts().is_empty());
}

#[tokio::test]
async fn test_interrupt_stops_dequeuing() {
    let config = test_config(5, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = coordinator(config, Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher));
    coordinator
        .cancel_flag()
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Stopped);
    assert!(report.interrupted);
    assert!(fetcher.attempts().is_empty());
    assert_eq!(report.unprocessed, vec!["https://site.test/".to_string()]);
}

#[tokio::test]
async fn test_resume_skips_finished_urls() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoint.db");

    let urls = ["https://site.test/a", "https://site.test/b", "https://site.test/c"];

    // First run stops on the first bot detection, leaving /c unprocessed
    let config = test_config(10, 0);
    let mut budget: CrawlBudget = config.budget.clone();
    budget.stop_thresholds.bot_detection = 1;

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .page("https://site.test/a", &[])
            .fail("https://site.test/b", FetchError::BotDetected("captcha".to_string())),
    );
    let first = coordinator(config.clone(), Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()));

    let report = first.run(seeds(&urls), budget, false).await.unwrap();
    assert_eq!(report.state, RunState::Stopped);
    assert_eq!(fetcher.attempts(), vec!["https://site.test/a", "https://site.test/b"]);

    // Second run resumes with the default thresholds
    let fetcher = Arc::new(ScriptedFetcher::new());
    let second = coordinator(config.clone(), Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()));

    let report = second
        .run(seeds(&urls), config.budget.clone(), true)
        .await
        .unwrap();

    assert!(report.resumed);
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(fetcher.attempts(), vec!["https://site.test/c"]);
    assert_eq!(report.stats.pages_fetched, 2);
    assert_eq!(report.stats.pages_failed, 1);

    let store = SqliteCheckpointStore::open(&db_path).unwrap();
    assert!(store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_fresh_run_discards_checkpoint() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoint.db");

    let config = test_config(10, 0);
    let mut budget = config.budget.clone();
    budget.stop_thresholds.bot_detection = 1;

    let fetcher = Arc::new(
        ScriptedFetcher::new().fail("https://site.test/a", FetchError::BotDetected("blocked".to_string())),
    );
    coordinator(config.clone(), Arc::new(FakeDriver::healthy()), fetcher)
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()))
        .run(seeds(&["https://site.test/a"]), budget, false)
        .await
        .unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let report = coordinator(config.clone(), Arc::new(FakeDriver::healthy()), Arc::clone(&fetcher))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()))
        .run(seeds(&["https://site.test/a"]), config.budget.clone(), false)
        .await
        .unwrap();

    assert!(!report.resumed);
    assert_eq!(fetcher.attempts(), vec!["https://site.test/a"]);
}

#[tokio::test]
async fn test_resume_after_adaptive_stop_counts_only_new_failures() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoint.db");

    let urls: Vec<String> = (0..7).map(|i| format!("https://site.test/p{}", i)).collect();
    let config = test_config(10, 0);

    // Every URL is blocked; the default threshold stops the run after five
    let blocked = urls.iter().fold(ScriptedFetcher::new(), |f, u| {
        f.fail(u, FetchError::BotDetected("captcha".to_string()))
    });
    let report = coordinator(config.clone(), Arc::new(FakeDriver::healthy()), Arc::new(blocked))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()))
        .run(urls.clone(), config.budget.clone(), false)
        .await
        .unwrap();
    assert_eq!(report.stop_reason.map(|r| r.key()), Some("bot_detection"));
    assert_eq!(report.unprocessed.len(), 2);

    // The resumed run only times out, which must not re-trip the old counter
    let slow = Arc::new(urls.iter().fold(ScriptedFetcher::new(), |f, u| {
        f.fail(u, FetchError::Timeout("page load exceeded".to_string()))
    }));
    let report = coordinator(config.clone(), Arc::new(FakeDriver::healthy()), Arc::clone(&slow))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()))
        .run(urls.clone(), config.budget.clone(), true)
        .await
        .unwrap();

    assert!(report.resumed);
    assert_eq!(slow.attempts().len(), 2);
    assert_eq!(report.state, RunState::Completed);
    assert!(report.stop_reason.is_none());
    assert_eq!(report.errors.bot_detection, 5);
    assert_eq!(report.errors.timeout, 2);
}

#[tokio::test]
async fn test_page_creation_failure_is_not_a_fetch_failure() {
    let config = test_config(3, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let driver = Arc::new(FakeDriver::healthy().with_failing_creates(2));
    let coordinator = coordinator(config, Arc::clone(&driver), Arc::clone(&fetcher));

    let report = coordinator
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(fetcher.attempts(), vec!["https://site.test/"]);
    assert_eq!(report.stats.pages_fetched, 1);
    assert_eq!(report.stats.pages_failed, 0);
    assert_eq!(report.errors.total, 0);
}

#[tokio::test]
async fn test_persistent_page_creation_failure_fails_run_and_checkpoints() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("checkpoint.db");

    let config = test_config(3, 0);
    let budget = config.budget.clone();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let driver = Arc::new(
        FakeDriver::healthy().with_failing_creates(MAX_CONSECUTIVE_CREATION_FAILURES as usize + 10),
    );
    let report = coordinator(config, Arc::clone(&driver), Arc::clone(&fetcher))
        .with_checkpoint_store(Box::new(SqliteCheckpointStore::open(&db_path).unwrap()))
        .run(seeds(&["https://site.test/"]), budget, false)
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert!(report
        .failure
        .as_deref()
        .is_some_and(|f| f.contains("page creation failed")));
    assert!(fetcher.attempts().is_empty());
    assert_eq!(report.errors.total, 0);
    assert_eq!(report.unprocessed, vec!["https://site.test/".to_string()]);

    let stored = SqliteCheckpointStore::open(&db_path).unwrap().load().unwrap().unwrap();
    assert_eq!(stored.record.frontier.len(), 1);
    assert!(stored.record.failed.is_empty());
}
