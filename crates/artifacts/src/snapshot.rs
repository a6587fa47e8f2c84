//! Timestamped snapshot retention for Maven snapshot repositories.

use crate::error::{ArtifactError, ArtifactResult};
use crate::events::ArtifactEventType;
use crate::management::ArtifactManagementService;
use depot_core::coordinates::SNAPSHOT_SUFFIX;
use depot_core::path::{join, parent};
use depot_core::{
    LayoutFormat, MavenCoordinates, RepositoryPolicy, SnapshotRevision, TRASH_DIR,
};
use depot_metadata::ArtifactEntryRepo;
use depot_storage::ObjectStore;
use std::collections::BTreeMap;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time};

/// Which timestamped revisions survive a sweep.
///
/// A revision is removed only when it falls outside the newest
/// `revisions_to_keep` AND is older than `keep_period`. A zero value lifts
/// that criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub revisions_to_keep: usize,
    pub keep_period: Duration,
}

impl RetentionPolicy {
    pub fn new(revisions_to_keep: usize, keep_period: Duration) -> Self {
        Self {
            revisions_to_keep,
            keep_period,
        }
    }

    fn removes(&self, rank: usize, timestamp: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
        let beyond_count = self.revisions_to_keep == 0 || rank >= self.revisions_to_keep;
        let beyond_age = self.keep_period.is_zero()
            || timestamp.is_some_and(|ts| now - ts > self.keep_period);
        beyond_count && beyond_age
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Repository-relative paths of removed files.
    pub removed: Vec<String>,
    /// Snapshot version directories examined.
    pub directories: usize,
}

/// `yyyyMMdd.HHmmss` as a UTC instant.
fn revision_time(revision: &SnapshotRevision) -> Option<OffsetDateTime> {
    let (date, clock) = revision.timestamp.split_once('.')?;
    let num = |s: &str| s.parse::<u32>().ok();

    let year = date.get(0..4)?.parse::<i32>().ok()?;
    let month = Month::try_from(num(date.get(4..6)?)? as u8).ok()?;
    let day = num(date.get(6..8)?)? as u8;
    let hour = num(clock.get(0..2)?)? as u8;
    let minute = num(clock.get(2..4)?)? as u8;
    let second = num(clock.get(4..6)?)? as u8;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

impl ArtifactManagementService {
    /// Remove old timestamped revisions below `path` in a snapshot repository.
    pub async fn remove_timestamped_snapshots(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        policy: RetentionPolicy,
    ) -> ArtifactResult<RetentionReport> {
        self.remove_timestamped_snapshots_at(
            storage_id,
            repository_id,
            path,
            policy,
            OffsetDateTime::now_utc(),
        )
        .await
    }

    /// [`remove_timestamped_snapshots`](Self::remove_timestamped_snapshots)
    /// judged against a fixed clock.
    #[tracing::instrument(skip(self, now))]
    pub async fn remove_timestamped_snapshots_at(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
        policy: RetentionPolicy,
        now: OffsetDateTime,
    ) -> ArtifactResult<RetentionReport> {
        let target = self.resolve_path(storage_id, repository_id, path)?;
        let repository = &target.repository;
        if repository.policy != RepositoryPolicy::Snapshot {
            return Err(ArtifactError::InvalidRepositoryPolicy(format!(
                "repository {}/{} has policy {}, snapshot retention requires snapshot",
                repository.storage_id, repository.id, repository.policy
            )));
        }
        if repository.layout != LayoutFormat::Maven2 {
            return Err(ArtifactError::Unsupported(format!(
                "snapshot retention is not implemented for {} repositories",
                repository.layout
            )));
        }

        let layout = self.layout_for(&target)?;
        let basedir = layout.resolve_repository(repository);
        let objects = &self.context().objects;
        let index = &self.context().index;

        // version directory -> revision -> files
        let mut directories: BTreeMap<String, BTreeMap<SnapshotRevision, Vec<String>>> =
            BTreeMap::new();
        for key in objects.list(&target.key).await? {
            let Some(relative) = key
                .strip_prefix(basedir.as_str())
                .map(|r| r.trim_start_matches('/'))
            else {
                continue;
            };
            if relative == TRASH_DIR || relative.starts_with(&format!("{TRASH_DIR}/")) {
                continue;
            }
            let Some(directory) = parent(relative) else {
                continue;
            };
            if !directory.ends_with(SNAPSHOT_SUFFIX) {
                continue;
            }
            let Some(revision) = MavenCoordinates::parse(relative)
                .ok()
                .and_then(|c| c.timestamped_revision())
            else {
                continue;
            };
            directories
                .entry(directory.to_string())
                .or_default()
                .entry(revision)
                .or_default()
                .push(relative.to_string());
        }

        let mut report = RetentionReport {
            directories: directories.len(),
            ..Default::default()
        };
        for (directory, revisions) in directories {
            for (rank, (revision, files)) in revisions.into_iter().rev().enumerate() {
                if !policy.removes(rank, revision_time(&revision), now) {
                    continue;
                }
                tracing::debug!(
                    directory = %directory,
                    revision = %revision,
                    files = files.len(),
                    "Removing snapshot revision"
                );
                for file in files {
                    match objects.delete(&join(&basedir, &file)).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                    index
                        .delete_artifact_entry(&repository.storage_id, &repository.id, &file)
                        .await?;
                    let removed = layout.resolve(repository, &file);
                    self.dispatch(ArtifactEventType::Deleted, &removed, false);
                    report.removed.push(file);
                }
            }
        }

        tracing::info!(
            directories = report.directories,
            removed = report.removed.len(),
            "Snapshot retention sweep finished"
        );
        Ok(report)
    }
}
