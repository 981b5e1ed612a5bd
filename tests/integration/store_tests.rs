//! Store behaviour on an on-disk database

use paper_harvest::output::{export_items, import_json, import_legacy_log, ExportFormat};
use paper_harvest::state::{EndReason, ItemStatus};
use paper_harvest::storage::{
    Cursor, ImportAction, ItemDescriptor, ItemRecord, ProgressDelta, RunCounts, RunParams, RunStatus,
    SqliteStorage, StatusUpdate, Storage, StorageError,
};
use tempfile::TempDir;

fn open(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(&dir.path().join("nested").join("papers.db")).unwrap()
}

fn descriptor(key: &str) -> ItemDescriptor {
    ItemDescriptor {
        key: key.to_string(),
        title: format!("Title {}", key),
        authors: vec!["A. Author".to_string()],
        source_url: Some(format!("https://library.test/document/{}/", key)),
        year: Some(2022),
    }
}

fn complete(storage: &mut SqliteStorage, key: &str, status: ItemStatus) {
    storage.upsert_item(&descriptor(key), None).unwrap();
    storage.begin_attempt(key, None).unwrap();
    let update = StatusUpdate {
        attempts: 1,
        last_error: (status != ItemStatus::Downloaded).then(|| "no access".to_string()),
        file_path: (status == ItemStatus::Downloaded).then(|| format!("{}.pdf", key)),
        file_size: (status == ItemStatus::Downloaded).then_some(1024),
    };
    storage.set_status(key, status, &update).unwrap();
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut storage = open(&dir);
        complete(&mut storage, "100", ItemStatus::Downloaded);
        storage.upsert_item(&descriptor("101"), None).unwrap();
    }

    let storage = open(&dir);
    assert_eq!(storage.count_items().unwrap(), 2);
    let item = storage.get_item("100").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Downloaded);
    assert_eq!(item.file_size, Some(1024));
    assert_eq!(storage.total_bytes().unwrap(), 1024);
}

#[test]
fn test_rediscovery_never_reverts_download() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    complete(&mut storage, "200", ItemStatus::Downloaded);

    let mut renamed = descriptor("200");
    renamed.title = "A better title".to_string();
    let record = storage.upsert_item(&renamed, None).unwrap();

    assert_eq!(record.status, ItemStatus::Downloaded);
    assert_eq!(record.title, "A better title");
    assert_eq!(storage.count_items().unwrap(), 1);
}

#[test]
fn test_terminal_items_reject_status_changes() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    complete(&mut storage, "300", ItemStatus::Skipped);

    let err = storage
        .set_status("300", ItemStatus::Downloaded, &StatusUpdate::default())
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidTransition { .. }));

    storage.reset_item("300").unwrap();
    let item = storage.get_item("300").unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert!(item.last_error.is_none());
}

#[test]
fn test_run_progress_accumulates() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    let run_id = storage
        .create_run(&RunParams {
            query: Some("radar".to_string()),
            search_url: None,
            year_from: Some(2020),
            year_to: Some(2021),
            max_results: 40,
            config_hash: "abc".to_string(),
        })
        .unwrap();

    for (key, status) in [("1", ItemStatus::Downloaded), ("2", ItemStatus::Failed)] {
        let mut counts = RunCounts::default();
        counts.record(status);
        let cursor = Cursor {
            page: 1,
            last_key: Some(key.to_string()),
            yielded: key.parse().unwrap(),
        };
        storage
            .record_run_progress(
                run_id,
                &ProgressDelta {
                    counts,
                    items_seen: 1,
                },
                &cursor,
            )
            .unwrap();
    }
    storage.finalize_run(run_id, &EndReason::Cancelled).unwrap();

    let run = storage.get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.counts.downloaded, 1);
    assert_eq!(run.counts.failed, 1);
    assert_eq!(run.items_seen, 2);
    assert_eq!(run.cursor.last_key.as_deref(), Some("2"));
    assert!(run.finished_at.is_some());
    assert_eq!(storage.get_latest_run().unwrap().unwrap().id, run_id);
}

#[test]
fn test_json_export_imports_into_empty_store() {
    let source_dir = TempDir::new().unwrap();
    let mut source = open(&source_dir);
    complete(&mut source, "1", ItemStatus::Downloaded);
    complete(&mut source, "2", ItemStatus::Skipped);
    complete(&mut source, "3", ItemStatus::Failed);
    source.upsert_item(&descriptor("4"), None).unwrap();

    let mut exported = Vec::new();
    let written = export_items(&source, ExportFormat::Json, &mut exported).unwrap();
    assert_eq!(written, 4);

    let target_dir = TempDir::new().unwrap();
    let mut target = open(&target_dir);
    let summary = import_json(&mut target, exported.as_slice()).unwrap();
    assert_eq!(summary.inserted, 4);

    let original = source.list_items(None).unwrap();
    let imported = target.list_items(None).unwrap();
    let keys = |items: &[ItemRecord]| -> Vec<(String, ItemStatus)> {
        let mut keys: Vec<_> = items.iter().map(|i| (i.key.clone(), i.status)).collect();
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        keys
    };
    assert_eq!(keys(&original), keys(&imported));
    assert_eq!(
        target.get_item("1").unwrap().unwrap().file_path.as_deref(),
        Some("1.pdf")
    );
}

#[test]
fn test_import_never_reverts_download() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    complete(&mut storage, "9", ItemStatus::Downloaded);

    let mut stale = storage.get_item("9").unwrap().unwrap();
    stale.status = ItemStatus::Failed;
    stale.last_error = Some("timeout".to_string());

    assert_eq!(storage.import_item(&stale).unwrap(), ImportAction::Kept);
    assert_eq!(
        storage.get_item("9").unwrap().unwrap().status,
        ItemStatus::Downloaded
    );
}

#[test]
fn test_csv_export_has_one_row_per_item() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    complete(&mut storage, "1", ItemStatus::Downloaded);
    storage.upsert_item(&descriptor("2"), None).unwrap();

    let mut out = Vec::new();
    export_items(&storage, ExportFormat::Csv, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("key,title,"));
    assert!(lines[1].starts_with("1,Title 1,"));
    assert!(lines[2].contains(",pending,"));
}

#[test]
fn test_legacy_log_merges_with_existing_state() {
    let dir = TempDir::new().unwrap();
    let mut storage = open(&dir);
    complete(&mut storage, "50", ItemStatus::Downloaded);

    let log = dir.path().join("download_state.jsonl");
    std::fs::write(
        &log,
        concat!(
            "{\"arnumber\": \"50\", \"title\": \"Fifty\", \"status\": \"failed\", \"ts\": 10}\n",
            "{\"arnumber\": \"51\", \"title\": \"Fifty-one\", \"status\": \"skipped\", \"ts\": 11}\n",
            "{\"arnumber\": \"52\", \"title\": \"Fifty-two\", \"status\": \"in_progress\"}\n",
            "{broken\n",
        ),
    )
    .unwrap();

    let (summary, parsed) = import_legacy_log(&mut storage, &log).unwrap();

    assert_eq!(parsed.malformed, 1);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.kept, 1);
    assert_eq!(
        storage.get_item("50").unwrap().unwrap().status,
        ItemStatus::Downloaded
    );
    assert_eq!(
        storage.get_item("51").unwrap().unwrap().status,
        ItemStatus::Skipped
    );
    assert_eq!(
        storage.get_item("52").unwrap().unwrap().status,
        ItemStatus::Pending
    );
}
