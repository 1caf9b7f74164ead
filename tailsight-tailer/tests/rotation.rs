//! Integration tests for the tailer against real files.
//!
//! These drive the state machine step by step through `advance()`, so no
//! test depends on sleeps except the one exercising `run()`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tailsight_tailer::{LogTailer, TailEvent, TailState, TailerConfig};
use tokio::sync::{mpsc, watch};

fn fast_config() -> TailerConfig {
    TailerConfig {
        poll_interval_ms: 10,
        missing_backoff_secs: 1,
        error_backoff_ms: 10,
    }
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
}

/// Collect lines until the tailer reports it has nothing more to deliver.
async fn drain(tailer: &mut LogTailer) -> Vec<String> {
    let mut lines = Vec::new();
    for _ in 0..1000 {
        match tailer.advance().await {
            TailEvent::Line(line) => lines.push(line),
            TailEvent::Idle(_) => return lines,
        }
    }
    panic!("tailer never went idle");
}

#[tokio::test]
async fn test_first_open_skips_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "old-1\nold-2\n");

    let mut tailer = LogTailer::new(&path, fast_config());
    assert!(drain(&mut tailer).await.is_empty());
    assert_eq!(tailer.state(), TailState::Tailing);
    assert_eq!(tailer.offset(), 12);

    append(&path, "new-1\nnew-2\n");
    assert_eq!(drain(&mut tailer).await, vec!["new-1", "new-2"]);
    assert_eq!(tailer.stats().lines, 2);
    assert_eq!(tailer.stats().opens, 1);
}

#[tokio::test]
async fn test_partial_line_is_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;

    append(&path, "GET|/a|2");
    assert!(drain(&mut tailer).await.is_empty());

    append(&path, "00");
    assert!(drain(&mut tailer).await.is_empty());

    append(&path, "|x\r\nnext");
    assert_eq!(drain(&mut tailer).await, vec!["GET|/a|200|x"]);

    append(&path, "\n");
    assert_eq!(drain(&mut tailer).await, vec!["next"]);
}

#[tokio::test]
async fn test_rename_rotation_reads_new_file_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "history\n");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;

    // Written just before rotation and not yet read.
    append(&path, "last-old\n");
    fs::rename(&path, dir.path().join("request.log.1")).unwrap();
    append(&path, "first-new\nsecond-new\n");

    assert_eq!(
        drain(&mut tailer).await,
        vec!["last-old", "first-new", "second-new"]
    );
    assert_eq!(tailer.stats().rotations, 1);
    assert_eq!(tailer.stats().opens, 2);

    // Steady state on the new file: nothing replayed.
    assert!(drain(&mut tailer).await.is_empty());
    append(&path, "third-new\n");
    assert_eq!(drain(&mut tailer).await, vec!["third-new"]);
}

#[tokio::test]
async fn test_replaced_file_emits_no_old_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "old-1\nold-2\nold-3\n");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;

    fs::remove_file(&path).unwrap();
    append(&path, "new-1\nnew-2\n");

    assert_eq!(drain(&mut tailer).await, vec!["new-1", "new-2"]);
    assert_eq!(tailer.stats().rotations, 1);
}

#[tokio::test]
async fn test_unterminated_line_in_rotated_file_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;

    append(&path, "cut-off");
    assert!(drain(&mut tailer).await.is_empty());

    fs::rename(&path, dir.path().join("request.log.1")).unwrap();
    append(&path, "fresh\n");

    assert_eq!(drain(&mut tailer).await, vec!["fresh"]);
}

#[tokio::test]
async fn test_copytruncate_restarts_at_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "0123456789abcdef\n");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;
    assert_eq!(tailer.offset(), 17);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(0).unwrap();
    drop(file);
    append(&path, "fresh\n");

    assert_eq!(drain(&mut tailer).await, vec!["fresh"]);
    assert_eq!(tailer.stats().truncations, 1);
    assert_eq!(tailer.stats().rotations, 0);
}

#[tokio::test]
async fn test_missing_then_created_file_starts_at_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");

    let mut tailer = LogTailer::new(&path, fast_config());
    assert_eq!(
        tailer.advance().await,
        TailEvent::Idle(Duration::from_secs(1))
    );
    assert_eq!(tailer.state(), TailState::FileMissing);

    append(&path, "before-first-open\n");
    assert!(drain(&mut tailer).await.is_empty());
    assert_eq!(tailer.stats().opens, 1);
    assert_eq!(tailer.stats().open_failures, 1);

    append(&path, "after-first-open\n");
    assert_eq!(drain(&mut tailer).await, vec!["after-first-open"]);
}

#[tokio::test]
async fn test_rotation_with_delayed_recreate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.log");
    append(&path, "");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;

    fs::rename(&path, dir.path().join("pool.log.1")).unwrap();
    assert!(drain(&mut tailer).await.is_empty());
    assert_eq!(tailer.state(), TailState::FileMissing);

    append(&path, "recreated-1\n");
    assert_eq!(drain(&mut tailer).await, vec!["recreated-1"]);
}

#[tokio::test]
async fn test_recreated_file_is_read_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "");

    let mut tailer = LogTailer::new(&path, fast_config());
    drain(&mut tailer).await;
    append(&path, "old-1\nold-2\nold-3\n");
    assert_eq!(drain(&mut tailer).await, vec!["old-1", "old-2", "old-3"]);
    assert_eq!(tailer.offset(), 18);

    fs::remove_file(&path).unwrap();
    assert!(drain(&mut tailer).await.is_empty());
    assert_eq!(tailer.state(), TailState::FileMissing);
    assert_eq!(tailer.offset(), 0);

    // Longer than the old offset, so a stale resume would skip lines
    append(&path, "new-1\nnew-2\nnew-3\nnew-4\n");
    assert_eq!(
        drain(&mut tailer).await,
        vec!["new-1", "new-2", "new-3", "new-4"]
    );
    assert_eq!(tailer.stats().rotations, 1);
}

#[tokio::test]
async fn test_run_delivers_lines_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("request.log");
    append(&path, "skipped\n");

    let tailer = LogTailer::new(&path, fast_config());
    let counters = tailer.counters();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(tailer.run(
        move |line| {
            let _ = line_tx.send(line);
        },
        shutdown_rx,
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        while counters.snapshot().opens == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("tailer never opened the file");

    append(&path, "one\ntwo\n");

    let mut received = Vec::new();
    while received.len() < 2 {
        let line = tokio::time::timeout(Duration::from_secs(5), line_rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed");
        received.push(line);
    }
    assert_eq!(received, vec!["one", "two"]);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("tailer did not stop")
        .unwrap();
}
