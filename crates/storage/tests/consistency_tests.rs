// Concurrent writers against the filesystem backend.
// Same-key uploads must resolve to exactly one writer's bytes.

mod common;

use common::{seeded_bytes, sha256_hash};
use depot_storage::{FilesystemBackend, ObjectStore};
use futures::StreamExt;
use std::sync::Arc;
use tempfile::TempDir;

const PAYLOAD_LEN: usize = 512 * 1024;

async fn upload_in_chunks(backend: Arc<FilesystemBackend>, key: &str, seed: u64) -> u64 {
    let data = seeded_bytes(seed, PAYLOAD_LEN);
    let mut upload = backend.put_stream(key).await.unwrap();
    for chunk in data.chunks(16 * 1024) {
        upload
            .write(bytes::Bytes::copy_from_slice(chunk))
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }
    upload.finish().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_last_writer_wins_without_interleaving() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(FilesystemBackend::new(temp_dir.path()).await.unwrap());
    let key = "storage0/releases/org/demo/1.0/demo-1.0.jar";

    let a = tokio::spawn(upload_in_chunks(backend.clone(), key, 1));
    let b = tokio::spawn(upload_in_chunks(backend.clone(), key, 2));
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap(), PAYLOAD_LEN as u64);
    assert_eq!(b.unwrap(), PAYLOAD_LEN as u64);

    let stored = backend.get(key).await.unwrap();
    let stored_hash = sha256_hash(&stored);
    assert!(
        stored_hash == sha256_hash(&seeded_bytes(1, PAYLOAD_LEN))
            || stored_hash == sha256_hash(&seeded_bytes(2, PAYLOAD_LEN)),
        "stored object must match exactly one upload"
    );

    // No temp files leak into listings.
    assert_eq!(backend.list("storage0").await.unwrap(), vec![key.to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(FilesystemBackend::new(temp_dir.path()).await.unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|i| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let key = format!("repo/artifact-{i}.bin");
                upload_in_chunks(backend, &key, i).await
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), PAYLOAD_LEN as u64);
    }

    for i in 0..8u64 {
        let stream = backend
            .get_stream(&format!("repo/artifact-{i}.bin"))
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        let mut body = Vec::with_capacity(PAYLOAD_LEN);
        for chunk in chunks {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(sha256_hash(&body), sha256_hash(&seeded_bytes(i, PAYLOAD_LEN)));
    }
}
