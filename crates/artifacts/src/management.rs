//! Artifact management: the store, resolve, delete and copy pipeline.

use crate::checksum_cache::ChecksumCache;
use crate::copy::{CopyStrategy, InboundStream};
use crate::error::{ArtifactError, ArtifactResult};
use crate::events::{ArtifactEvent, ArtifactEventType, EventRegistry};
use crate::layout::{
    ArtifactInputStream, ArtifactOutputStream, FileKind, LayoutContext, LayoutProvider,
    LayoutRegistry, ResolvedPath, WriteSummary,
};
use crate::metrics::{
    ARTIFACTS_STORED, BYTES_STORED, CHECKSUM_RECONCILIATIONS, STORE_DURATION, STORE_FAILURES,
};
use crate::validators::{ArtifactOperationsValidator, ValidatorChain};
use depot_core::digest::parse_checksum_text;
use depot_core::{Configuration, DigestAlgorithm, DigestMap};
use depot_metadata::{ArtifactEntryRepo, ArtifactEntryRow, MetadataStore};
use dashmap::DashMap;
use depot_storage::{ObjectStore, TEMP_MARKER};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

/// Result of comparing an uploaded checksum with the cached digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// No digests were cached for the base path.
    NoEntry,
    /// The uploaded value equals at least one cached digest.
    Matched {
        matched: Vec<DigestAlgorithm>,
        unmatched: Vec<DigestAlgorithm>,
    },
    /// The uploaded value equals none of the cached digests.
    Unmatched { unmatched: Vec<DigestAlgorithm> },
}

impl Reconciliation {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::NoEntry => "no_entry",
            Self::Matched { .. } => "matched",
            Self::Unmatched { .. } => "unmatched",
        }
    }
}

/// Coordinates layouts, validators, the checksum cache, the index and
/// lifecycle events for every repository operation.
pub struct ArtifactManagementService {
    configuration: Arc<Configuration>,
    context: LayoutContext,
    layouts: LayoutRegistry,
    validators: ValidatorChain,
    checksum_cache: Arc<ChecksumCache>,
    events: EventRegistry,
    /// Serializes publish-and-commit per object key.
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ArtifactManagementService {
    /// Service with the built-in layouts and validators.
    pub fn new(
        configuration: Arc<Configuration>,
        context: LayoutContext,
        checksum_cache: Arc<ChecksumCache>,
        events: EventRegistry,
    ) -> Self {
        Self {
            configuration,
            layouts: LayoutRegistry::standard(context.clone()),
            context,
            validators: ValidatorChain::standard(),
            checksum_cache,
            events,
            write_locks: DashMap::new(),
        }
    }

    pub fn with_layouts(mut self, layouts: LayoutRegistry) -> Self {
        self.layouts = layouts;
        self
    }

    pub fn with_validators(mut self, validators: ValidatorChain) -> Self {
        self.validators = validators;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn checksum_cache(&self) -> &Arc<ChecksumCache> {
        &self.checksum_cache
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn index(&self) -> &Arc<dyn MetadataStore> {
        &self.context.index
    }

    pub(crate) fn context(&self) -> &LayoutContext {
        &self.context
    }

    /// Layout serving the repository of `target`.
    pub fn layout_for(&self, target: &ResolvedPath) -> ArtifactResult<&Arc<dyn LayoutProvider>> {
        self.layouts.get(target.repository.layout)
    }

    /// Look up the repository and resolve `path` through its layout.
    pub fn resolve_path(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> ArtifactResult<ResolvedPath> {
        let storage = self
            .configuration
            .storage(storage_id)
            .ok_or_else(|| ArtifactError::NotFound(format!("storage {storage_id}")))?;
        let repository = storage.repository(repository_id).ok_or_else(|| {
            ArtifactError::NotFound(format!("repository {storage_id}/{repository_id}"))
        })?;
        let layout = self.layouts.get(repository.layout)?;
        Ok(layout.resolve(repository, path))
    }

    /// Run acceptance validation, then store.
    #[instrument(skip(self, stream))]
    pub async fn validate_and_store(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        stream: InboundStream,
    ) -> ArtifactResult<u64> {
        let accepted = ArtifactOperationsValidator::validate_path(path)
            .and_then(|()| self.resolve_path(storage_id, repository_id, path));
        let target = match accepted {
            Ok(target) => target,
            Err(e) => {
                STORE_FAILURES.with_label_values(&[e.code()]).inc();
                return Err(e);
            }
        };
        if let Err(e) = self.validate_acceptance(&target).await {
            STORE_FAILURES.with_label_values(&[e.code()]).inc();
            return Err(e);
        }
        self.store(&target, stream).await
    }

    async fn validate_acceptance(&self, target: &ResolvedPath) -> ArtifactResult<()> {
        let repository = &target.repository;
        let layout = self.layout_for(target)?;
        let kind = layout.classify(&target.path);
        if kind == FileKind::Artifact {
            let coordinates = layout.extract_coordinates(&target.path)?;
            self.validators.validate(repository, &coordinates)?;
        }

        ArtifactOperationsValidator::check_deployment(repository)?;
        let exists = layout.exists(target).await?;
        ArtifactOperationsValidator::check_redeployment(repository, kind, &target.path, exists)?;
        Ok(())
    }

    /// Write `stream` to `target`, index it and run the checksum protocol.
    ///
    /// The index row is staged in a transaction before the upload is
    /// published and committed after it, so a failed copy never leaves an
    /// index entry. A failed commit puts back whatever the key held before.
    #[instrument(skip_all, fields(target = %target))]
    pub async fn store(&self, target: &ResolvedPath, stream: InboundStream) -> ArtifactResult<u64> {
        let timer = STORE_DURATION.start_timer();
        match self.store_inner(target, stream).await {
            Ok(bytes) => {
                timer.observe_duration();
                Ok(bytes)
            }
            Err(e) => {
                timer.stop_and_discard();
                STORE_FAILURES.with_label_values(&[e.code()]).inc();
                Err(e)
            }
        }
    }

    async fn store_inner(
        &self,
        target: &ResolvedPath,
        mut stream: InboundStream,
    ) -> ArtifactResult<u64> {
        let layout = self.layout_for(target)?;
        let repository = &target.repository;
        let kind = layout.classify(&target.path);

        let pre_event = if repository.is_hosted() {
            ArtifactEventType::Uploading
        } else {
            ArtifactEventType::Downloading
        };
        self.dispatch(pre_event, target, false);

        let mut output = layout.open_write_stream(target, kind).await?;
        let strategy = CopyStrategy::for_repository(repository);
        if let Err(e) = strategy.copy(&mut stream, &mut output).await {
            discard(output, "Failed to discard aborted upload").await;
            return Err(e);
        }

        let mut row = ArtifactEntryRow::new(
            repository.storage_id.as_str(),
            repository.id.as_str(),
            target.path.as_str(),
            repository.layout.as_str(),
        );
        row.coordinates = match kind {
            FileKind::Artifact => layout
                .extract_coordinates(&target.path)
                .ok()
                .and_then(|c| serde_json::to_string(&c).ok()),
            FileKind::Metadata | FileKind::Checksum(_) => None,
        };
        row.size_bytes = output.bytes_written() as i64;
        row.is_remote = repository.is_proxy();

        let lock = self.write_lock(&target.key);
        let published = {
            let _guard = lock.lock().await;
            self.publish(target, output, &row).await
        };
        self.release_write_lock(&target.key, lock);
        let (summary, existed) = published?;

        match kind {
            FileKind::Metadata => {
                self.dispatch(ArtifactEventType::MetadataFileUpdated, target, existed);
                if repository.is_hosted() {
                    self.dispatch(ArtifactEventType::MetadataFileUploaded, target, existed);
                }
            }
            FileKind::Checksum(_) => {
                self.dispatch(ArtifactEventType::ChecksumFileUpdated, target, existed);
            }
            FileKind::Artifact => {
                self.dispatch(ArtifactEventType::Uploaded, target, existed);
            }
        }

        match kind {
            FileKind::Artifact if !summary.digests.is_empty() => {
                self.checksum_cache.put_all(&target.key, summary.digests);
            }
            FileKind::Checksum(algorithm) => {
                if let Some(buffered) = summary.buffered.filter(|b| !b.is_empty()) {
                    let reconciliation =
                        self.reconcile_checksum(&**layout, target, algorithm, &buffered);
                    self.events.dispatch(
                        self.event(ArtifactEventType::ChecksumUploaded, target)
                            .replaced(existed)
                            .with_reconciliation(reconciliation),
                    );
                }
            }
            _ => {}
        }

        ARTIFACTS_STORED.with_label_values(&[kind.as_str()]).inc();
        BYTES_STORED.inc_by(summary.bytes_written);
        tracing::debug!(
            kind = kind.as_str(),
            bytes = summary.bytes_written,
            replaced = existed,
            "Stored file"
        );
        Ok(summary.bytes_written)
    }

    /// Publish a finished upload and commit its index row.
    ///
    /// Callers hold the write lock of `target.key`. A file already under the
    /// key is copied aside first and put back if the commit fails, so the
    /// stored bytes never run ahead of the index. Returns the summary and
    /// whether a file was replaced.
    async fn publish(
        &self,
        target: &ResolvedPath,
        output: ArtifactOutputStream,
        row: &ArtifactEntryRow,
    ) -> ArtifactResult<(WriteSummary, bool)> {
        let backup = match self.back_up(&target.key).await {
            Ok(backup) => backup,
            Err(e) => {
                discard(output, "Failed to discard upload after backup error").await;
                return Err(e);
            }
        };

        let pending = match self.context.index.stage_artifact_entry(row).await {
            Ok(pending) => pending,
            Err(e) => {
                discard(output, "Failed to discard upload after index error").await;
                self.drop_backup(backup.as_deref()).await;
                return Err(e.into());
            }
        };

        let summary = match output.finish().await {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(rollback_err) = pending.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back index entry");
                }
                self.drop_backup(backup.as_deref()).await;
                return Err(e);
            }
        };

        if let Err(e) = pending.commit().await {
            tracing::warn!(error = %e, key = %target.key, "Failed to commit index entry");
            self.restore(&target.key, backup.as_deref()).await;
            return Err(e.into());
        }

        self.drop_backup(backup.as_deref()).await;
        Ok((summary, backup.is_some()))
    }

    /// Copy the object under `key`, if any, to a hidden sibling key.
    async fn back_up(&self, key: &str) -> ArtifactResult<Option<String>> {
        let objects = &self.context.objects;
        if !objects.exists(key).await? {
            return Ok(None);
        }
        let backup = format!("{key}{TEMP_MARKER}{}", Uuid::new_v4());
        objects.copy(key, &backup).await?;
        Ok(Some(backup))
    }

    /// Undo a publish whose index commit failed.
    async fn restore(&self, key: &str, backup: Option<&str>) {
        let objects = &self.context.objects;
        let result = match backup {
            Some(backup) => objects.rename(backup, key).await,
            None => match objects.delete(key).await {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                key = %key,
                "Failed to restore previous content after index error"
            );
        }
    }

    async fn drop_backup(&self, backup: Option<&str>) {
        let Some(backup) = backup else {
            return;
        };
        // Best-effort cleanup - listings never show the backup
        if let Err(e) = self.context.objects.delete(backup).await {
            tracing::warn!(error = %e, backup = %backup, "Failed to remove backup copy");
        }
    }

    fn write_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.write_locks.entry(key.to_string()).or_default().clone()
    }

    /// Drop the lock entry once no other writer holds or waits on it.
    fn release_write_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.write_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Compare an uploaded checksum with the digests cached for its base
    /// file. Never fails: the outcome is logged and the entry is dropped.
    fn reconcile_checksum(
        &self,
        layout: &dyn LayoutProvider,
        target: &ResolvedPath,
        algorithm: DigestAlgorithm,
        raw: &[u8],
    ) -> Reconciliation {
        let Some((base_key, _)) = layout.checksum_algorithm(&target.key) else {
            return Reconciliation::NoEntry;
        };

        let result = match self.checksum_cache.remove(base_key, algorithm) {
            None => {
                tracing::debug!(
                    path = %target.path,
                    algorithm = %algorithm,
                    "No cached digests to reconcile checksum against"
                );
                Reconciliation::NoEntry
            }
            Some(cached) => compare_checksum(&cached, parse_checksum_text(raw).as_deref()),
        };

        match &result {
            Reconciliation::Matched { matched, unmatched } => {
                tracing::debug!(
                    path = %target.path,
                    algorithm = %algorithm,
                    matched = ?matched,
                    unmatched = ?unmatched,
                    "Checksum matched"
                );
            }
            Reconciliation::Unmatched { unmatched } => {
                tracing::warn!(
                    path = %target.path,
                    algorithm = %algorithm,
                    unmatched = ?unmatched,
                    "Checksum does not match any computed digest"
                );
            }
            Reconciliation::NoEntry => {}
        }
        CHECKSUM_RECONCILIATIONS
            .with_label_values(&[result.outcome()])
            .inc();
        result
    }

    /// Open a read stream, treating any failure as absence.
    pub async fn resolve(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Option<ArtifactInputStream> {
        match self.resolve_strict(storage_id, repository_id, path).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(
                    storage_id = %storage_id,
                    repository_id = %repository_id,
                    path = %path,
                    error = %e,
                    "Resolve failed, reporting as absent"
                );
                None
            }
        }
    }

    /// Open a read stream. Absence is `Ok(None)`; real failures propagate.
    pub async fn resolve_strict(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> ArtifactResult<Option<ArtifactInputStream>> {
        ArtifactOperationsValidator::validate_path(path)?;
        let target = self.resolve_path(storage_id, repository_id, path)?;
        let layout = self.layout_for(&target)?;
        if !layout.exists(&target).await? {
            return Ok(None);
        }
        match layout.open_read_stream(&target).await {
            Ok(stream) => Ok(Some(stream)),
            // Deleted between the existence check and the open.
            Err(ArtifactError::Storage(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn contains(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> ArtifactResult<bool> {
        ArtifactOperationsValidator::validate_path(path)?;
        let target = self.resolve_path(storage_id, repository_id, path)?;
        self.layout_for(&target)?.contains(&target).await
    }

    /// Delete a file or directory. Returns the number of objects removed.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        force: bool,
    ) -> ArtifactResult<u64> {
        ArtifactOperationsValidator::validate_path(path)?;
        let target = self.resolve_path(storage_id, repository_id, path)?;
        let force = ArtifactOperationsValidator::check_deletion(&target.repository, force)?;

        let removed = self.layout_for(&target)?.delete(&target, force).await?;
        if removed > 0 {
            self.dispatch(ArtifactEventType::Deleted, &target, false);
        }
        tracing::info!(path = %path, removed = removed, force = force, "Deleted");
        Ok(removed)
    }

    /// Copy a file or directory into another repository at the same path.
    ///
    /// Only the bytes move; the destination index is not updated.
    #[instrument(skip(self))]
    pub async fn copy(
        &self,
        source_storage_id: &str,
        source_repository_id: &str,
        dest_storage_id: &str,
        dest_repository_id: &str,
        path: &str,
    ) -> ArtifactResult<u64> {
        ArtifactOperationsValidator::validate_path(path)?;
        let source = self.resolve_path(source_storage_id, source_repository_id, path)?;
        let destination = self.resolve_path(dest_storage_id, dest_repository_id, path)?;
        if source.repository.layout != destination.repository.layout {
            return Err(ArtifactError::Unsupported(format!(
                "cannot copy from a {} repository to a {} repository",
                source.repository.layout, destination.repository.layout
            )));
        }

        let copied = self
            .layout_for(&source)?
            .copy(&source, &destination)
            .await?;
        tracing::info!(
            source = %source,
            destination = %destination,
            copied = copied,
            "Copied"
        );
        Ok(copied)
    }

    pub(crate) fn dispatch(&self, event_type: ArtifactEventType, target: &ResolvedPath, replaced: bool) {
        self.events
            .dispatch(self.event(event_type, target).replaced(replaced));
    }

    fn event(&self, event_type: ArtifactEventType, target: &ResolvedPath) -> ArtifactEvent {
        ArtifactEvent::new(
            event_type,
            target.storage_id(),
            target.repository_id(),
            &target.path,
        )
    }
}

/// Abort an upload that will not be published, logging any failure.
async fn discard(output: ArtifactOutputStream, message: &'static str) {
    if let Err(e) = output.abort().await {
        tracing::warn!(error = %e, "{}", message);
    }
}

/// Partition the cached algorithms by whether their digest equals the
/// uploaded checksum.
fn compare_checksum(cached: &DigestMap, uploaded: Option<&str>) -> Reconciliation {
    let (matched, unmatched): (Vec<_>, Vec<_>) = cached
        .iter()
        .partition(|(_, digest)| uploaded.is_some_and(|u| u.eq_ignore_ascii_case(digest)));
    let matched: Vec<DigestAlgorithm> = matched.into_iter().map(|(alg, _)| *alg).collect();
    let unmatched: Vec<DigestAlgorithm> = unmatched.into_iter().map(|(alg, _)| *alg).collect();

    if matched.is_empty() {
        Reconciliation::Unmatched { unmatched }
    } else {
        Reconciliation::Matched { matched, unmatched }
    }
}
