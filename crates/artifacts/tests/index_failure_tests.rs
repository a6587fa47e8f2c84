//! Integration tests for stores whose index commit fails after the bytes
//! were published.

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{STORAGE, TestEnv, body, seeded_bytes};
use depot_artifacts::{ArtifactError, ArtifactEventType};
use depot_metadata::{
    ArtifactEntryRepo, ArtifactEntryRow, MetadataError, MetadataResult, MetadataStore,
    PendingUpsert, UpsertOutcome,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

const SNAPSHOT_JAR: &str = "org/example/demo/1.0-SNAPSHOT/demo-1.0-SNAPSHOT.jar";

/// Index whose commits fail for rows of one configured size.
struct FlakyIndex {
    inner: Arc<dyn MetadataStore>,
    failing_size: AtomicI64,
}

impl FlakyIndex {
    fn fail_commits_of_size(&self, size: usize) {
        self.failing_size.store(size as i64, Ordering::SeqCst);
    }
}

struct RefusedCommit(Box<dyn PendingUpsert>);

#[async_trait]
impl PendingUpsert for RefusedCommit {
    fn outcome(&self) -> UpsertOutcome {
        self.0.outcome()
    }

    async fn commit(self: Box<Self>) -> MetadataResult<UpsertOutcome> {
        self.0.rollback().await?;
        Err(MetadataError::Config("commit refused".to_string()))
    }

    async fn rollback(self: Box<Self>) -> MetadataResult<()> {
        self.0.rollback().await
    }
}

#[async_trait]
impl ArtifactEntryRepo for FlakyIndex {
    async fn stage_artifact_entry(
        &self,
        entry: &ArtifactEntryRow,
    ) -> MetadataResult<Box<dyn PendingUpsert>> {
        let pending = self.inner.stage_artifact_entry(entry).await?;
        if entry.size_bytes == self.failing_size.load(Ordering::SeqCst) {
            Ok(Box::new(RefusedCommit(pending)))
        } else {
            Ok(pending)
        }
    }

    async fn get_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<Option<ArtifactEntryRow>> {
        self.inner
            .get_artifact_entry(storage_id, repository_id, artifact_path)
            .await
    }

    async fn delete_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<bool> {
        self.inner
            .delete_artifact_entry(storage_id, repository_id, artifact_path)
            .await
    }

    async fn delete_artifact_entries_with_prefix(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<u64> {
        self.inner
            .delete_artifact_entries_with_prefix(storage_id, repository_id, prefix)
            .await
    }

    async fn list_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<Vec<ArtifactEntryRow>> {
        self.inner
            .list_artifact_entries(storage_id, repository_id, prefix)
            .await
    }

    async fn count_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> MetadataResult<u64> {
        self.inner
            .count_artifact_entries(storage_id, repository_id)
            .await
    }
}

#[async_trait]
impl MetadataStore for FlakyIndex {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

async fn flaky_env() -> (TestEnv, Arc<FlakyIndex>) {
    let mut handle = None;
    let env = TestEnv::with_index(|inner| {
        let flaky = Arc::new(FlakyIndex {
            inner,
            failing_size: AtomicI64::new(-1),
        });
        handle = Some(flaky.clone());
        flaky as Arc<dyn MetadataStore>
    })
    .await;
    (env, handle.expect("Index wrapper not built"))
}

async fn indexed_size(env: &TestEnv, path: &str) -> Option<i64> {
    env.service
        .index()
        .get_artifact_entry(STORAGE, "snapshots", path)
        .await
        .unwrap()
        .map(|entry| entry.size_bytes)
}

#[tokio::test]
async fn test_failed_commit_restores_previous_content() {
    let (env, index) = flaky_env().await;
    env.service
        .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body("v1"))
        .await
        .unwrap();
    env.listener.clear();

    index.fail_commits_of_size("v2-longer".len());
    let err = env
        .service
        .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body("v2-longer"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Index(_)));
    assert!(err.is_storage_failure());

    // Bytes and index still agree on the first upload.
    assert_eq!(
        env.read("snapshots", SNAPSHOT_JAR).await.unwrap(),
        Bytes::from_static(b"v1")
    );
    assert_eq!(indexed_size(&env, SNAPSHOT_JAR).await, Some(2));
    assert!(env.temp_files().is_empty(), "left behind: {:?}", env.temp_files());
    assert_eq!(
        env.listener.types_for(SNAPSHOT_JAR),
        vec![ArtifactEventType::Uploading]
    );

    // The digests of the rejected bytes are not pending reconciliation.
    let cached = env
        .service
        .checksum_cache()
        .get(&env.cache_key("snapshots", SNAPSHOT_JAR))
        .unwrap();
    assert_eq!(
        cached,
        depot_core::digest::compute(&cached.keys().copied().collect::<Vec<_>>(), b"v1")
    );
}

#[tokio::test]
async fn test_failed_commit_of_new_file_leaves_nothing() {
    let (env, index) = flaky_env().await;
    index.fail_commits_of_size(5);

    let err = env
        .service
        .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body("fresh"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Index(_)));

    assert!(!env.service.contains(STORAGE, "snapshots", SNAPSHOT_JAR).await.unwrap());
    assert_eq!(env.index_count("snapshots").await, 0);
    assert!(env.service.checksum_cache().is_empty());
    assert!(env.temp_files().is_empty());

    // A later upload of another size goes through as a first upload.
    env.service
        .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body("second"))
        .await
        .unwrap();
    let uploaded: Vec<bool> = env
        .listener
        .events()
        .into_iter()
        .filter(|e| e.event_type == ArtifactEventType::Uploaded)
        .map(|e| e.replaced)
        .collect();
    assert_eq!(uploaded, vec![false]);
}

#[tokio::test]
async fn test_successful_overwrite_removes_backup_copy() {
    let (env, _index) = flaky_env().await;
    for content in ["first", "second", "third"] {
        env.service
            .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body(content))
            .await
            .unwrap();
    }
    assert_eq!(
        env.read("snapshots", SNAPSHOT_JAR).await.unwrap(),
        Bytes::from_static(b"third")
    );
    assert!(env.temp_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_with_failing_commits_stay_consistent() {
    let (env, index) = flaky_env().await;
    const FAILING_LEN: usize = 40_000;
    index.fail_commits_of_size(FAILING_LEN);

    let mut bodies: Vec<Bytes> = (0..6u64)
        .map(|i| seeded_bytes(200 + i, 50_000 + i as usize))
        .collect();
    bodies.extend((0..6u64).map(|i| seeded_bytes(300 + i, FAILING_LEN)));

    let mut handles = Vec::new();
    for data in bodies.clone() {
        let service = env.service.clone();
        handles.push(tokio::spawn(async move {
            let failing = data.len() == FAILING_LEN;
            let result = service
                .validate_and_store(STORAGE, "snapshots", SNAPSHOT_JAR, body(data))
                .await;
            (failing, result.is_ok())
        }));
    }
    for handle in handles {
        let (failing, ok) = handle.await.unwrap();
        assert_eq!(ok, !failing);
    }

    // Whatever is stored was committed, and the index describes it.
    let stored = env.read("snapshots", SNAPSHOT_JAR).await.unwrap();
    assert_ne!(stored.len(), FAILING_LEN);
    assert!(bodies.contains(&stored));
    assert_eq!(
        indexed_size(&env, SNAPSHOT_JAR).await,
        Some(stored.len() as i64)
    );
    assert!(env.temp_files().is_empty());
}
