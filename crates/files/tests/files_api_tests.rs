//! Key-addressed file API.

mod common;

use bytes::Bytes;
use common::*;
use rowgrid_files::OpenMode;

#[tokio::test]
async fn test_put_get_list_remove() {
    let db = memory_db("default").await;
    let files = db.files();

    let key = files.put(Bytes::from_static(b"hello"), None).await.expect("put");
    assert_eq!(key.as_str().len(), 32);
    assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));

    let mut handle = files.get(key.as_str()).await.expect("get");
    assert_eq!(handle.read(None).await.expect("read"), &b"hello"[..]);

    assert!(files.list().await.expect("list").contains(&key.to_string()));

    files.remove(key.as_str()).await.expect("remove");
    assert!(!files.exists(key.as_str()).await.expect("exists"));
    // removing twice is fine
    files.remove(key.as_str()).await.expect("remove again");
}

#[tokio::test]
async fn test_put_with_key_overwrites() {
    let db = memory_db("default").await;
    let files = db.files();

    let key = files
        .put(Bytes::from_static(b"first"), Some("notes/today.txt"))
        .await
        .expect("put");
    assert_eq!(key.as_str(), "notes/today.txt");
    files
        .put(Bytes::from_static(b"second"), Some("notes/today.txt"))
        .await
        .expect("put again");

    assert_eq!(files.read("notes/today.txt").await.expect("read"), &b"second"[..]);
}

#[tokio::test]
async fn test_generated_keys_are_unique() {
    let db = memory_db("default").await;
    let files = db.files();

    let mut keys = std::collections::HashSet::new();
    for _ in 0..50 {
        let key = files.put(Bytes::from_static(b"x"), None).await.expect("put");
        assert!(keys.insert(key));
    }
    assert_eq!(files.list().await.expect("list").len(), 50);
}

#[tokio::test]
async fn test_read_missing_is_not_found() {
    let db = memory_db("default").await;
    let files = db.files();

    assert!(files.read("nope").await.unwrap_err().is_not_found());
    assert!(files.get("nope").await.unwrap_err().is_not_found());
    assert!(files.stat("nope").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_invalid_keys_and_patterns() {
    let db = memory_db("default").await;
    let files = db.files();

    assert!(files.write("", Bytes::new()).await.unwrap_err().is_validation());
    let long = "k".repeat(256);
    assert!(files.exists(&long).await.unwrap_err().is_validation());
    assert!(files.find("img/[a-").await.unwrap_err().is_validation());
    assert!(files.find("").await.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_find_glob() {
    let db = memory_db("default").await;
    let files = db.files();
    for key in ["photos/2024/a.jpg", "photos/2024/b.png", "photos/2023/c.jpg", "readme"] {
        files.write(key, Bytes::from_static(b"data")).await.expect("write");
    }

    assert_eq!(
        files.find("photos/*.jpg").await.expect("find"),
        vec!["photos/2023/c.jpg", "photos/2024/a.jpg"]
    );
    assert_eq!(
        files.find("photos/2024/?.*").await.expect("find"),
        vec!["photos/2024/a.jpg", "photos/2024/b.png"]
    );
    assert_eq!(
        files.find("photos/%.{png,gif}").await.expect("find"),
        vec!["photos/2024/b.png"]
    );
    assert_eq!(files.find("*").await.expect("find").len(), 4);
}

#[tokio::test]
async fn test_write_read_large_file() {
    let (db, _dir) = file_db("default").await;
    let files = db.files();
    // 4-byte chunks: 2500 rows, read through parallel batches
    let payload: Bytes = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    files.write("big.bin", payload.clone()).await.expect("write");
    assert_eq!(files.read("big.bin").await.expect("read"), payload);

    let info = files.stat("big.bin").await.expect("stat");
    assert_eq!(info.size, 10_000);
    assert_eq!(info.chunks, 2500);
}

#[tokio::test]
async fn test_append() {
    let db = memory_db("default").await;
    let files = db.files();

    files.append("log", Bytes::from_static(b"one\n")).await.expect("append");
    files.append("log", Bytes::from_static(b"two\n")).await.expect("append");
    assert_eq!(files.read("log").await.expect("read"), &b"one\ntwo\n"[..]);

    let mut handle = files.open("log", OpenMode::Append).await.expect("open");
    handle.write(b"three\n").expect("write");
    handle.close().await.expect("close");
    assert_eq!(files.read("log").await.expect("read"), &b"one\ntwo\nthree\n"[..]);
}

#[tokio::test]
async fn test_empty_file_exists() {
    let db = memory_db("default").await;
    let files = db.files();

    files.write("empty", Bytes::new()).await.expect("write");
    assert!(files.exists("empty").await.expect("exists"));
    assert!(files.read("empty").await.expect("read").is_empty());
    assert_eq!(files.stat("empty").await.expect("stat").size, 0);
}

#[tokio::test]
async fn test_aliases_are_isolated() {
    let first = memory_db("first").await;
    let second = memory_db("second").await;

    first
        .files()
        .write("shared/name", Bytes::from_static(b"one"))
        .await
        .expect("write");

    assert!(first.files().exists("shared/name").await.expect("exists"));
    assert!(!second.files().exists("shared/name").await.expect("exists"));
    assert!(second.files().list().await.expect("list").is_empty());
}
