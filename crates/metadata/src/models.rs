//! Database row models.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Artifact index entry. Unique on (storage_id, repository_id, artifact_path).
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactEntryRow {
    pub entry_id: Uuid,
    pub storage_id: String,
    pub repository_id: String,
    pub artifact_path: String,
    /// Layout format tag of the owning repository.
    pub layout: String,
    /// Serialized coordinates, absent for files that carry none.
    pub coordinates: Option<String>,
    pub size_bytes: i64,
    /// Content cached from an upstream (proxy repository).
    pub is_remote: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ArtifactEntryRow {
    /// A fresh row stamped with the current time.
    pub fn new(
        storage_id: impl Into<String>,
        repository_id: impl Into<String>,
        artifact_path: impl Into<String>,
        layout: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            entry_id: Uuid::new_v4(),
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
            artifact_path: artifact_path.into(),
            layout: layout.into(),
            coordinates: None,
            size_bytes: 0,
            is_remote: false,
            created_at: now,
            updated_at: now,
        }
    }
}
