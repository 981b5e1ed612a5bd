//! End-to-end harvest runs against the scripted fake browser

use crate::support::{pdf_files, test_config, FakeBrowser, ItemScript, PDF_BYTES};
use paper_harvest::harvest::{Coordinator, RunRequest, SearchSource, Tactic};
use paper_harvest::storage::{Cursor, ItemDescriptor, RunStatus, Storage};
use paper_harvest::{EndReason, HarvestError, ItemStatus};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn query(max_results: u32) -> RunRequest {
    RunRequest {
        source: SearchSource::query("signal processing"),
        max_results,
    }
}

#[tokio::test]
async fn test_result_cap_spans_pages() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, 1..=10)
        .with_page(2, 11..=20)
        .with_page(3, 21..=30);
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    let report = coordinator.start_run(query(25)).await.unwrap();

    assert_eq!(report.end_reason, EndReason::Completed);
    assert_eq!(report.counts.downloaded, 25);
    assert_eq!(report.counts.total(), 25);
    assert_eq!(handle.delivered().len(), 25);
    assert_eq!(handle.search_loads(), 3);
    assert_eq!(
        report.cursor,
        Cursor {
            page: 3,
            last_key: Some("25".to_string()),
            yielded: 25,
        }
    );

    let storage = coordinator.storage();
    assert_eq!(storage.count_items().unwrap(), 25);
    assert!(storage.get_item("25").unwrap().is_some());
    assert!(storage.get_item("26").unwrap().is_none());
    assert_eq!(pdf_files(&config).len(), 25);

    let item = storage.get_item("21").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Downloaded);
    assert_eq!(item.attempts, 1);
    assert_eq!(item.authors, vec!["Author 21"]);
    assert_eq!(item.year, Some(2023));
    assert!(item
        .file_path
        .unwrap()
        .ends_with("21 - Paper number 21 on signal processing.pdf"));
}

#[tokio::test]
async fn test_rerun_does_not_download_again() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new().with_page(1, 1..=5);
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    coordinator.start_run(query(10)).await.unwrap();
    let second = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(second.end_reason, EndReason::Completed);
    assert_eq!(second.counts.total(), 0);
    assert_eq!(second.already_done, 5);
    assert_eq!(handle.delivered().len(), 5);
    assert_eq!(handle.attempts("3"), 1);
}

#[tokio::test]
async fn test_access_restriction_skips_without_retry() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, [1, 2])
        .with_item("1", ItemScript::denied());
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.counts.skipped, 1);
    assert_eq!(report.counts.downloaded, 1);
    assert_eq!(handle.attempts("1"), 1);

    let item = coordinator.storage().get_item("1").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Skipped);
    assert_eq!(item.attempts, 1);
    assert!(item.last_error.unwrap().contains("purchase pdf"));
    assert!(item.file_path.is_none());

    let files = pdf_files(&config);
    assert_eq!(files.len(), 1);
    assert!(files[0].file_name().unwrap().to_string_lossy().starts_with("2 - "));
}

#[tokio::test]
async fn test_embedded_viewer_succeeds_on_last_attempt() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, [7])
        .with_item("7", ItemScript::via(Tactic::EmbeddedViewer, 3));
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.counts.downloaded, 1);
    assert_eq!(handle.attempts("7"), 3);

    let item = coordinator.storage().get_item("7").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Downloaded);
    assert_eq!(item.attempts, 3);
    let path = item.file_path.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), PDF_BYTES);
    assert_eq!(item.file_size, Some(PDF_BYTES.len() as u64));
}

#[tokio::test]
async fn test_download_control_tactic() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, [8])
        .with_item("8", ItemScript::via(Tactic::DownloadControl, 1));

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.counts.downloaded, 1);
    let item = coordinator.storage().get_item("8").unwrap().unwrap();
    assert_eq!(item.attempts, 1);
}

#[tokio::test]
async fn test_exhausted_budget_marks_failed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, [4])
        .with_item("4", ItemScript::never());
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.end_reason, EndReason::Completed);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(handle.attempts("4"), config.download.max_attempts);

    let item = coordinator.storage().get_item("4").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, config.download.max_attempts);
    assert!(item.last_error.is_some());
}

#[tokio::test]
async fn test_non_pdf_download_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let script = ItemScript {
        body: b"<html><body>Please sign in</body></html>".to_vec(),
        ..ItemScript::direct()
    };
    let browser = FakeBrowser::new().with_page(1, [5]).with_item("5", script);

    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.counts.failed, 1);
    let item = coordinator.storage().get_item("5").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.last_error.unwrap().contains("Verification failed"));
    assert!(pdf_files(&config).is_empty());
}

#[tokio::test]
async fn test_rate_limited_item_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let script = ItemScript {
        rate_limited: true,
        ..ItemScript::direct()
    };
    let browser = FakeBrowser::new().with_page(1, [6]).with_item("6", script);
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.counts.failed, 1);
    assert_eq!(handle.attempts("6"), 3);
    let item = coordinator.storage().get_item("6").unwrap().unwrap();
    assert!(item.last_error.unwrap().contains("Rate limited"));
}

#[tokio::test]
async fn test_existing_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    std::fs::create_dir_all(&config.download.directory).unwrap();
    let target = config
        .download
        .directory
        .join("9 - Paper number 9 on signal processing.pdf");
    std::fs::write(&target, b"stale partial copy").unwrap();

    let browser = FakeBrowser::new().with_page(1, [9]);
    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), PDF_BYTES);
    assert_eq!(pdf_files(&config).len(), 1);
}

#[tokio::test]
async fn test_resume_after_crash_skips_terminal_items() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let browser = FakeBrowser::new()
        .with_page(1, 1..=10)
        .with_page(2, 11..=20);
    let handle = browser.clone();
    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    handle.state.lock().unwrap().cancel_after = Some((13, coordinator.cancel_signal()));

    let first = coordinator.start_run(query(50)).await.unwrap();
    assert_eq!(first.end_reason, EndReason::Cancelled);
    assert_eq!(first.counts.downloaded, 13);
    assert_eq!(first.cursor.page, 2);
    assert_eq!(first.cursor.last_key.as_deref(), Some("13"));

    // Process dies while item 14 is in flight
    let storage = coordinator.storage_mut();
    storage
        .upsert_item(&ItemDescriptor::new("14", "Paper number 14"), Some(first.run_id))
        .unwrap();
    storage.begin_attempt("14", Some(first.run_id)).unwrap();
    drop(coordinator);

    let browser = FakeBrowser::new()
        .with_page(1, 1..=10)
        .with_page(2, 11..=20);
    let handle = browser.clone();
    let mut coordinator = Coordinator::new(config.clone(), "test", browser).unwrap();
    assert_eq!(
        coordinator.storage().get_item("14").unwrap().unwrap().status,
        ItemStatus::Pending
    );

    let second = coordinator.resume_run(first.run_id).await.unwrap();

    assert_eq!(second.end_reason, EndReason::Completed);
    assert_eq!(second.counts.downloaded, 7);
    assert_eq!(second.already_done, 0);
    let expected: Vec<String> = (14..=20).map(|k| k.to_string()).collect();
    assert_eq!(handle.delivered(), expected);
    for key in 1..=13 {
        assert_eq!(handle.attempts(&key.to_string()), 0);
    }

    let counts = coordinator.storage().count_by_status().unwrap();
    assert_eq!(counts.get(&ItemStatus::Downloaded).copied(), Some(20));
    assert_eq!(pdf_files(&config).len(), 20);
}

#[tokio::test]
async fn test_cancel_during_download_wait() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.download.direct_timeout_ms = 60_000;
    config.download.item_timeout_ms = 60_000;

    let browser = FakeBrowser::new()
        .with_page(1, [1, 2])
        .with_item("1", ItemScript::never());
    browser.state.lock().unwrap().hang_waits = true;

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let cancel = coordinator.cancel_signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(report.counts.total(), 0);
    assert_eq!(report.cursor, Cursor::default());

    let storage = coordinator.storage();
    assert_eq!(
        storage.get_item("1").unwrap().unwrap().status,
        ItemStatus::InProgress
    );
    assert!(storage.get_item("2").unwrap().is_none());

    let run = storage.get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.end_reason, Some(EndReason::Cancelled));
    assert_eq!(run.counts, report.counts);
}

#[tokio::test]
async fn test_page_load_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new().with_page(1, 1..=3);
    browser.state.lock().unwrap().failing_search_loads = 3;
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    match &report.end_reason {
        EndReason::Fatal(cause) => assert!(cause.contains("page 1")),
        other => panic!("expected fatal end, got {:?}", other),
    }
    assert_eq!(handle.search_loads(), 3);
    assert_eq!(report.counts.total(), 0);

    let run = coordinator.storage().get_run(report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_transient_page_failure_recovers() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new().with_page(1, 1..=3);
    browser.state.lock().unwrap().failing_search_loads = 2;

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator.start_run(query(10)).await.unwrap();

    assert_eq!(report.end_reason, EndReason::Completed);
    assert_eq!(report.counts.downloaded, 3);
}

#[tokio::test]
async fn test_retry_failed_items() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new()
        .with_page(1, [1, 2])
        .with_item("2", ItemScript::never());
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let first = coordinator.start_run(query(10)).await.unwrap();
    assert_eq!(first.counts.failed, 1);

    handle.set_item("2", ItemScript::direct());
    let retry = coordinator.retry_failed().await.unwrap();

    assert_eq!(retry.end_reason, EndReason::Completed);
    assert_eq!(retry.counts.downloaded, 1);
    let item = coordinator.storage().get_item("2").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Downloaded);
    assert_eq!(item.attempts, 1);
    assert!(item.last_error.is_none());
    assert_eq!(handle.attempts("1"), 1);
}

#[tokio::test]
async fn test_existing_search_url_source() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let browser = FakeBrowser::new().with_page(1, [31, 32]).with_page(2, [33]);
    let handle = browser.clone();

    let mut coordinator = Coordinator::new(config, "test", browser).unwrap();
    let report = coordinator
        .start_run(RunRequest {
            source: SearchSource::Url(
                "https://library.test/search/searchresult.jsp?queryText=radar&refinements=x&pageNumber=7"
                    .to_string(),
            ),
            max_results: 10,
        })
        .await
        .unwrap();

    assert_eq!(report.counts.downloaded, 3);
    let navigations = handle.state.lock().unwrap().navigations.clone();
    assert!(navigations
        .iter()
        .any(|u| u.contains("refinements=x") && u.contains("pageNumber=2")));

    let run = coordinator.storage().get_run(report.run_id).unwrap();
    assert!(run.search_url.unwrap().contains("refinements=x"));
    assert_eq!(run.query, None);
}

#[tokio::test]
async fn test_second_controller_is_busy() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let first = Coordinator::new(config.clone(), "test", FakeBrowser::new()).unwrap();
    match Coordinator::new(config.clone(), "test", FakeBrowser::new()) {
        Err(HarvestError::ResourceBusy { pid, .. }) => assert_eq!(pid, std::process::id()),
        Err(other) => panic!("expected ResourceBusy, got {}", other),
        Ok(_) => panic!("second controller acquired the lock"),
    }

    drop(first);
    assert!(Coordinator::new(config, "test", FakeBrowser::new()).is_ok());
}

#[tokio::test]
async fn test_resume_unknown_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let mut coordinator = Coordinator::new(config, "test", FakeBrowser::new()).unwrap();

    assert!(matches!(
        coordinator.resume_run(42).await,
        Err(HarvestError::RunNotFound(42))
    ));
}
