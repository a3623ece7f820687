//! Hash-verified writes: round trips, stale preimages, and batches.

use std::path::Path;

use conclave::edit::{hash_content, hash_file, EditRequest, OptimisticWriter, EMPTY_HASH};
use conclave::Error;

#[tokio::test]
async fn test_write_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let writer = OptimisticWriter::new();

    let written = writer
        .write(&EditRequest::new(dir.path(), "src/lib.rs", "pub fn a() {}\n"))
        .await
        .unwrap();
    assert!(written.success);

    let on_disk = hash_file(&dir.path().join("src/lib.rs")).await.unwrap();
    assert_eq!(on_disk, written.hash);

    let (content, hash) = writer.read(dir.path(), Path::new("src/lib.rs")).await.unwrap();
    assert_eq!(content, "pub fn a() {}\n");
    assert_eq!(hash, written.hash);
}

#[tokio::test]
async fn test_fresh_preimage_succeeds_and_stale_preimage_fails() {
    let dir = tempfile::tempdir().unwrap();
    let writer = OptimisticWriter::new();

    let first = writer
        .write(&EditRequest::new(dir.path(), "a.txt", "v1").with_preimage(EMPTY_HASH))
        .await
        .unwrap();
    assert!(first.success);

    let second = writer
        .write(&EditRequest::new(dir.path(), "a.txt", "v2").with_preimage(first.hash.clone()))
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!(second.hash, hash_content("v2"));

    // Writing against the hash from before the second write is rejected.
    let stale = writer
        .write(&EditRequest::new(dir.path(), "a.txt", "v3").with_preimage(first.hash))
        .await
        .unwrap();
    assert!(!stale.success);
    assert_eq!(stale.hash, second.hash);
    assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v2");
}

#[tokio::test]
async fn test_second_writer_with_same_preimage_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("shared.txt"), "base").unwrap();
    let base = hash_content("base");

    let requests: Vec<EditRequest> = (0..2)
        .map(|i| {
            EditRequest::new(dir.path(), "shared.txt", format!("writer {i}"))
                .with_preimage(base.clone())
        })
        .collect();

    let writer = OptimisticWriter::new();
    let first = writer.write(&requests[0]).await.unwrap();
    let second = writer.write(&requests[1]).await.unwrap();

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(second.hash, hash_content("writer 0"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("shared.txt")).unwrap(),
        "writer 0"
    );
}

#[tokio::test]
async fn test_batch_write_is_independent_per_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("kept.txt"), "original").unwrap();

    let requests = vec![
        EditRequest::new(dir.path(), "one.txt", "1"),
        EditRequest::new(dir.path(), "kept.txt", "clobbered").with_preimage(EMPTY_HASH),
        EditRequest::new(dir.path(), "../escape.txt", "x"),
        EditRequest::new(dir.path(), "nested/two.txt", "2").with_preimage(EMPTY_HASH),
    ];

    let results = OptimisticWriter::new().batch_write(&requests).await;
    assert_eq!(results.len(), 4);

    assert!(results[0].as_ref().unwrap().success);
    let conflict = results[1].as_ref().unwrap();
    assert!(conflict.is_conflict());
    assert_eq!(conflict.hash, hash_content("original"));
    assert!(matches!(results[2], Err(Error::Validation(_))));
    assert!(results[3].as_ref().unwrap().success);

    assert_eq!(std::fs::read_to_string(dir.path().join("kept.txt")).unwrap(), "original");
    assert_eq!(std::fs::read_to_string(dir.path().join("nested/two.txt")).unwrap(), "2");
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn test_many_concurrent_writers_to_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let requests: Vec<EditRequest> = (0..32)
        .map(|i| {
            EditRequest::new(dir.path(), format!("files/{i}.txt"), format!("content {i}"))
                .with_preimage(EMPTY_HASH)
        })
        .collect();

    let results = OptimisticWriter::new().batch_write(&requests).await;
    for (i, result) in results.into_iter().enumerate() {
        let result = result.unwrap();
        assert!(result.success, "write {i} should succeed");
        assert_eq!(result.hash, hash_content(format!("content {i}")));
    }
}
