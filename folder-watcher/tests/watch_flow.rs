//! End-to-end tests for watching a folder and keeping the catalog in sync.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use sau_folder_watcher::{
    JsonFileStore, MemoryStore, WatchConfig, WatchController, WatcherError,
};
use tempfile::TempDir;

const POLL: Duration = Duration::from_millis(25);

async fn controller() -> WatchController {
    let config = WatchConfig::new().with_poll_interval(POLL);
    WatchController::new(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap()
}

fn write(dir: &Path, name: &str, len: usize) {
    std::fs::write(dir.join(name), vec![b'x'; len]).unwrap();
}

async fn names(controller: &WatchController) -> Vec<String> {
    controller
        .list()
        .await
        .into_iter()
        .map(|r| r.file_name)
        .collect()
}

/// Poll the catalog until `expected` shows up or a generous deadline passes.
async fn wait_for_names(controller: &WatchController, expected: &[&str]) -> Vec<String> {
    for _ in 0..200 {
        let current = names(controller).await;
        if current == expected {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    names(controller).await
}

#[tokio::test]
async fn test_external_delete_is_reconciled() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", 100);
    write(dir.path(), "b.txt", 200);

    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();
    assert_eq!(names(&controller).await, vec!["a.txt", "b.txt"]);

    std::fs::remove_file(dir.path().join("a.txt")).unwrap();

    let listed = wait_for_names(&controller, &["b.txt"]).await;
    assert_eq!(listed, vec!["b.txt"]);
    let remaining = controller.list().await;
    assert_eq!(remaining[0].size_bytes, 200);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_external_modification_is_reconciled() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", 10);

    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();
    let before = controller.list().await.remove(0);

    write(dir.path(), "a.txt", 500);

    let mut after = before.clone();
    for _ in 0..200 {
        after = controller.list().await.remove(0);
        if after.size_bytes == 500 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(after.size_bytes, 500);
    assert_eq!(after.id, before.id);
    assert_eq!(after.discovered_at, before.discovered_at);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_switching_folders_drops_old_entries() {
    let folder_a = TempDir::new().unwrap();
    let folder_b = TempDir::new().unwrap();
    write(folder_a.path(), "from_a.txt", 1);
    write(folder_b.path(), "from_b.txt", 1);

    let controller = controller().await;
    controller.start_watch(folder_a.path()).await.unwrap();
    let watched_b = controller.start_watch(folder_b.path()).await.unwrap();

    assert_eq!(names(&controller).await, vec!["from_b.txt"]);

    // Changes in A after the switch must never reach the catalog.
    write(folder_a.path(), "late_a.txt", 1);
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(names(&controller).await, vec!["from_b.txt"]);
    assert_eq!(controller.get_watch().await, Some(watched_b));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_upload_visible_before_next_poll() {
    let dir = TempDir::new().unwrap();
    let config = WatchConfig::new().with_poll_interval(Duration::from_secs(60));
    let controller = WatchController::new(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    controller.start_watch(dir.path()).await.unwrap();

    let record = controller
        .pipeline()
        .upload("c.txt", b"fresh bytes")
        .await
        .unwrap();

    let listed = controller.list().await;
    assert_eq!(listed, vec![record]);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_uploads_of_same_name() {
    let dir = TempDir::new().unwrap();
    let controller = Arc::new(controller().await);
    controller.start_watch(dir.path()).await.unwrap();

    let payloads: Vec<Vec<u8>> = (1..=8).map(|n| vec![n as u8; n * 1000]).collect();
    let mut handles = Vec::new();
    for payload in payloads {
        let controller = Arc::clone(&controller);
        handles.push(tokio::spawn(async move {
            controller.pipeline().upload("x.png", &payload).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(WatcherError::Conflict(_)) => {}
            Err(e) => panic!("unexpected upload error: {e}"),
        }
    }
    assert!(successes >= 1);

    let listed = controller.list().await;
    assert_eq!(listed.len(), 1);
    let on_disk = std::fs::metadata(dir.path().join("x.png")).unwrap().len();
    assert_eq!(listed[0].size_bytes, on_disk);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_delete_unknown_id_leaves_catalog_alone() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", 1);
    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();
    let before = controller.list().await;

    let result = controller.pipeline().delete("ffffffffffffffff").await;

    assert!(matches!(result, Err(WatcherError::NotFound(_))));
    assert_eq!(controller.list().await, before);
    controller.shutdown().await;
}

#[tokio::test]
async fn test_delete_removes_file_and_record() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", 1);
    write(dir.path(), "b.txt", 1);
    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();
    let target = controller.catalog().find_by_name("a.txt").await.unwrap();

    controller.pipeline().delete(&target.id).await.unwrap();

    assert!(!dir.path().join("a.txt").exists());
    assert_eq!(names(&controller).await, vec!["b.txt"]);
    tokio::time::sleep(POLL * 4).await;
    assert_eq!(names(&controller).await, vec!["b.txt"]);
    controller.shutdown().await;
}

#[tokio::test]
async fn test_watch_resumes_after_restart() {
    let state = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();
    write(watched.path(), "kept.mp4", 3);
    let state_file = state.path().join("settings.json");

    let folder = {
        let store = Arc::new(JsonFileStore::open(&state_file).await.unwrap());
        let controller = WatchController::new(WatchConfig::new().with_poll_interval(POLL), store)
            .await
            .unwrap();
        let folder = controller.start_watch(watched.path()).await.unwrap();
        controller.shutdown().await;
        folder
    };

    let store = Arc::new(JsonFileStore::open(&state_file).await.unwrap());
    let controller = WatchController::new(WatchConfig::new().with_poll_interval(POLL), store)
        .await
        .unwrap();
    assert_eq!(controller.resume().await.unwrap(), Some(folder));
    assert_eq!(names(&controller).await, vec!["kept.mp4"]);
    assert!(controller.status().await.is_running);

    controller.stop_watch().await.unwrap();
    let store = Arc::new(JsonFileStore::open(&state_file).await.unwrap());
    let controller = WatchController::new(WatchConfig::new(), store).await.unwrap();
    assert_eq!(controller.resume().await.unwrap(), None);
}

#[tokio::test]
async fn test_upload_racing_folder_switch() {
    let folder_a = TempDir::new().unwrap();
    let folder_b = TempDir::new().unwrap();
    let config = WatchConfig::new().with_poll_interval(Duration::from_secs(60));
    let controller = Arc::new(
        WatchController::new(config, Arc::new(MemoryStore::new()))
            .await
            .unwrap(),
    );
    controller.start_watch(folder_a.path()).await.unwrap();

    for round in 0..20 {
        let target = if round % 2 == 0 {
            folder_b.path().to_path_buf()
        } else {
            folder_a.path().to_path_buf()
        };
        let switch = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.start_watch(&target).await })
        };
        let upload = {
            let controller = Arc::clone(&controller);
            let name = format!("round{round}.txt");
            tokio::spawn(async move { controller.pipeline().upload(&name, b"data").await })
        };

        let watched = switch.await.unwrap().unwrap();
        match upload.await.unwrap() {
            Ok(record) => {
                let listed = controller.catalog().get(&record.id).await.is_some();
                let in_watched = record.absolute_path.parent() == Some(watched.as_path());
                assert_eq!(listed, in_watched, "round {round}: {record:?}");
            }
            Err(WatcherError::Conflict(_)) => {}
            Err(e) => panic!("unexpected upload error: {e}"),
        }
    }

    controller.shutdown().await;
}

#[tokio::test]
async fn test_uploaded_file_deleted_externally_is_dropped() {
    let dir = TempDir::new().unwrap();
    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();

    let record = controller
        .pipeline()
        .upload("short-lived.txt", b"gone soon")
        .await
        .unwrap();
    std::fs::remove_file(&record.absolute_path).unwrap();

    let listed = wait_for_names(&controller, &[]).await;
    assert!(listed.is_empty(), "stale records: {listed:?}");

    controller.shutdown().await;
}

#[tokio::test]
async fn test_upload_of_filtered_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let controller = controller().await;
    controller.start_watch(dir.path()).await.unwrap();

    let result = controller.pipeline().upload("draft.tmp", b"x").await;

    assert!(matches!(result, Err(WatcherError::InvalidName(_))));
    assert!(!dir.path().join("draft.tmp").exists());
    assert!(controller.list().await.is_empty());
    controller.shutdown().await;
}
