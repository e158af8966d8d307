//! Spool-directory queue behaviour against a real directory

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use courier_queue::{FileQueue, OutboundEmail, QueueConfig, QueueSource};

fn queue_in(dir: &tempfile::TempDir) -> FileQueue {
    let queue = FileQueue::builder()
        .path(dir.path().to_path_buf())
        .visibility_timeout(Duration::from_secs(20))
        .build()
        .expect("temp dir is a valid queue path");
    queue.init().expect("init");
    queue
}

fn issue(to: &str, group: &str) -> OutboundEmail {
    OutboundEmail::new(to, "Issue 12: Things", "<section>...</section>")
        .with_group(group)
        .with_sender("issues@example.org")
}

#[tokio::test]
async fn test_enqueue_fetch_acknowledge() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);

    let id = queue.enqueue(&issue("reader@example.com", "12")).await.unwrap();
    assert!(dir.path().join(format!("{id}.json")).exists());

    let batch = queue.fetch_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].destination, "reader@example.com");
    assert_eq!(batch[0].group_key, "12");
    assert_eq!(batch[0].from.as_deref(), Some("issues@example.org"));
    assert_eq!(batch[0].receive_count, 1);

    // Leased, so a second fetch sees nothing
    assert!(queue.fetch_batch(10).await.unwrap().is_empty());

    queue.acknowledge(&batch[0].delivery_handle).await.unwrap();
    assert!(!dir.path().join(format!("{id}.json")).exists());
    assert!(queue.list().await.unwrap().is_empty());

    // Acknowledging again is a no-op
    queue.acknowledge(&batch[0].delivery_handle).await.unwrap();
}

#[tokio::test]
async fn test_fetch_in_creation_order() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);

    for i in 0..15 {
        queue
            .enqueue(&issue(&format!("r{i}@example.com"), &format!("{}", i % 3)))
            .await
            .unwrap();
    }

    let batch = queue.fetch_batch(100).await.unwrap();
    assert_eq!(batch.len(), 10, "fetch limit caps the batch");

    let destinations: Vec<_> = batch.iter().map(|m| m.destination.clone()).collect();
    let expected: Vec<_> = (0..10).map(|i| format!("r{i}@example.com")).collect();
    assert_eq!(destinations, expected);
}

#[tokio::test]
async fn test_group_waits_for_leased_message() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);

    queue.enqueue(&issue("a@example.com", "12")).await.unwrap();
    queue.enqueue(&issue("b@example.com", "12")).await.unwrap();
    queue.enqueue(&issue("c@example.com", "13")).await.unwrap();

    let first = queue.fetch_batch(1).await.unwrap();
    assert_eq!(first[0].destination, "a@example.com");

    let second = queue.fetch_batch(10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].destination, "c@example.com");

    queue.release(&first[0].delivery_handle).await.unwrap();
    let third = queue.fetch_batch(10).await.unwrap();
    let destinations: Vec<_> = third.iter().map(|m| m.destination.as_str()).collect();
    assert_eq!(destinations, ["a@example.com", "b@example.com"]);
    assert_eq!(third[0].receive_count, 2);
}

/// Each scheduled `courier run` opens the spool directory afresh
fn reopen(dir: &tempfile::TempDir, visibility_timeout: Duration) -> FileQueue {
    let queue = FileQueue::builder()
        .path(dir.path().to_path_buf())
        .visibility_timeout(visibility_timeout)
        .build()
        .unwrap();
    queue.init().unwrap();
    queue
}

#[tokio::test]
async fn test_lease_is_honoured_by_other_instances() {
    let dir = tempfile::tempdir().unwrap();
    let first = queue_in(&dir);
    let id = first.enqueue(&issue("a@example.com", "12")).await.unwrap();
    first.enqueue(&issue("b@example.com", "12")).await.unwrap();

    let batch = first.fetch_batch(1).await.unwrap();
    assert_eq!(batch[0].destination, "a@example.com");
    assert!(dir.path().join(format!("{id}.lease")).exists());

    // A later process neither sees the leased message nor overtakes it
    let second = reopen(&dir, Duration::from_secs(20));
    assert!(second.fetch_batch(10).await.unwrap().is_empty());

    second.release(&batch[0].delivery_handle).await.unwrap();
    let batch = second.fetch_batch(10).await.unwrap();
    let destinations: Vec<_> = batch.iter().map(|m| m.destination.as_str()).collect();
    assert_eq!(destinations, ["a@example.com", "b@example.com"]);
    assert_eq!(batch[0].receive_count, 2);
    assert_eq!(batch[1].receive_count, 1);
}

#[tokio::test]
async fn test_receive_count_survives_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let id = queue_in(&dir)
        .enqueue(&issue("bounced@example.com", "7"))
        .await
        .unwrap();

    // Each run leases the message and leaves it for the lease to expire
    for run in 1..=3 {
        let queue = reopen(&dir, Duration::from_millis(200));
        let batch = queue.fetch_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1, "run {run}");
        assert_eq!(batch[0].receive_count, run);
        assert!(queue.fetch_batch(10).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let queue = reopen(&dir, Duration::from_millis(200));
    assert_eq!(queue.receive_count(&id).await.unwrap(), 3);

    let batch = queue.fetch_batch(10).await.unwrap();
    queue.acknowledge(&batch[0].delivery_handle).await.unwrap();
    assert!(!dir.path().join(format!("{id}.json")).exists());
    assert!(!dir.path().join(format!("{id}.lease")).exists());
    assert_eq!(queue.receive_count(&id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_stale_handle_cannot_release_newer_lease() {
    let dir = tempfile::tempdir().unwrap();
    let queue = reopen(&dir, Duration::from_millis(200));
    queue.enqueue(&issue("a@example.com", "1")).await.unwrap();

    let stale = queue.fetch_batch(10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let other = reopen(&dir, Duration::from_secs(20));
    let current = other.fetch_batch(10).await.unwrap();
    assert_eq!(current[0].receive_count, 2);

    queue.release(&stale[0].delivery_handle).await.unwrap();
    assert!(other.fetch_batch(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_init_removes_orphaned_leases() {
    let dir = tempfile::tempdir().unwrap();
    let orphan = dir.path().join(format!("{}.lease", ulid::Ulid::new()));
    std::fs::write(&orphan, br#"{"receipt":2,"group":"1","expires_at_ms":0}"#).unwrap();

    let queue = queue_in(&dir);
    let id = queue.enqueue(&issue("a@example.com", "1")).await.unwrap();
    queue.fetch_batch(10).await.unwrap();

    let queue = queue_in(&dir);
    assert!(!orphan.exists());
    assert!(dir.path().join(format!("{id}.lease")).exists());
    assert_eq!(queue.receive_count(&id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);

    let bad = ulid::Ulid::new();
    std::fs::write(dir.path().join(format!("{bad}.json")), b"{ not json").unwrap();
    queue.enqueue(&issue("ok@example.com", "1")).await.unwrap();

    let batch = queue.fetch_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].destination, "ok@example.com");
    assert!(dir.path().join(format!("{bad}.json.rejected")).exists());
}

#[tokio::test]
async fn test_reads_producer_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);

    let id = ulid::Ulid::new();
    std::fs::write(
        dir.path().join(format!("{id}.json")),
        br#"{
            "ConfigurationSetName": "Newsletter",
            "Destination": "reader@example.com",
            "FromEmailAddress": "issues@example.org",
            "Subject": "Issue 3",
            "Body": "<p>Hi</p>",
            "MessageGroupId": "3"
        }"#,
    )
    .unwrap();

    let batch = queue.fetch_batch(10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].configuration_set.as_deref(), Some("Newsletter"));
    assert_eq!(batch[0].group_key, "3");
}

#[tokio::test]
async fn test_init_cleans_interrupted_writes() {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join(format!(".tmp_{}.json", ulid::Ulid::new()));
    std::fs::write(&temp, b"partial").unwrap();

    let queue = queue_in(&dir);
    assert!(!temp.exists());
    assert!(queue.fetch_batch(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_directory_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let queue = queue_in(&dir);
    let path = dir.path().to_path_buf();
    drop(dir);
    assert!(!path.exists());

    let result = queue.fetch_batch(10).await;
    assert!(matches!(result, Err(courier_queue::QueueError::Unavailable(_))));
}

#[tokio::test]
async fn test_config_builds_file_queue() {
    let dir = tempfile::tempdir().unwrap();
    let spool = dir.path().join("spool");

    let config = QueueConfig::File(FileQueue::builder().path(spool.clone()).build().unwrap());
    let source = config.into_queue_source().unwrap();

    assert!(spool.is_dir());
    assert!(source.fetch_batch(10).await.unwrap().is_empty());
}
