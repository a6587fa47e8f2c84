//! Artifact index repository.

use crate::error::MetadataResult;
use crate::models::ArtifactEntryRow;
use async_trait::async_trait;

/// Whether an upsert created a new entry or updated the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// An upsert executed inside an open transaction, not yet visible to readers.
///
/// Dropping the handle without calling [`commit`](PendingUpsert::commit)
/// rolls the transaction back.
#[async_trait]
pub trait PendingUpsert: Send {
    /// What the upsert will do once committed.
    fn outcome(&self) -> UpsertOutcome;

    /// Make the upsert visible.
    async fn commit(self: Box<Self>) -> MetadataResult<UpsertOutcome>;

    /// Discard the upsert.
    async fn rollback(self: Box<Self>) -> MetadataResult<()>;
}

/// Repository for artifact index entries.
///
/// Prefix queries treat `prefix` as a directory: they match the path itself
/// and every path below it. An empty prefix matches the whole repository.
#[async_trait]
pub trait ArtifactEntryRepo: Send + Sync {
    /// Upsert an entry inside a transaction and hand back the open handle.
    ///
    /// An existing entry keeps its `entry_id` and `created_at`; every other
    /// column takes the new value.
    async fn stage_artifact_entry(
        &self,
        entry: &ArtifactEntryRow,
    ) -> MetadataResult<Box<dyn PendingUpsert>>;

    /// Upsert and commit in one step.
    async fn upsert_artifact_entry(&self, entry: &ArtifactEntryRow) -> MetadataResult<UpsertOutcome> {
        self.stage_artifact_entry(entry).await?.commit().await
    }

    /// Get an entry by its unique key.
    async fn get_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<Option<ArtifactEntryRow>>;

    /// Delete an entry. Returns whether one existed.
    async fn delete_artifact_entry(
        &self,
        storage_id: &str,
        repository_id: &str,
        artifact_path: &str,
    ) -> MetadataResult<bool>;

    /// Delete the entry at `prefix` and every entry below it.
    async fn delete_artifact_entries_with_prefix(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<u64>;

    /// List entries at or below `prefix`, ordered by path.
    async fn list_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
        prefix: &str,
    ) -> MetadataResult<Vec<ArtifactEntryRow>>;

    /// Count entries in a repository.
    async fn count_artifact_entries(
        &self,
        storage_id: &str,
        repository_id: &str,
    ) -> MetadataResult<u64>;
}

/// `prefix/` with surrounding slashes normalized, or `None` for the root.
pub(crate) fn directory_prefix(prefix: &str) -> Option<(String, String)> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some((trimmed.to_string(), format!("{trimmed}/")))
    }
}
