//! Repository traits for metadata operations.

pub mod artifacts;

pub use artifacts::{ArtifactEntryRepo, PendingUpsert, UpsertOutcome};
