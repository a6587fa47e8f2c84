//! Core domain types and shared logic for the depot artifact repository.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Storages, repositories, policies and layout formats
//! - Artifact paths and path validation
//! - Format-specific artifact coordinates (Maven, NuGet)
//! - Digest algorithms and incremental multi-algorithm hashing
//! - Configuration types

pub mod config;
pub mod coordinates;
pub mod digest;
pub mod error;
pub mod path;
pub mod repository;

pub use coordinates::{ArtifactCoordinates, MavenCoordinates, NugetCoordinates, SnapshotRevision};
pub use digest::{DigestAlgorithm, DigestMap, MultiDigester};
pub use error::{Error, Result};
pub use repository::{
    Configuration, LayoutFormat, Repository, RepositoryDefinition, RepositoryKind,
    RepositoryPolicy, Storage, StorageDefinition,
};

/// Directory (relative to a repository base) that receives deleted content
/// when the repository keeps a trash.
pub const TRASH_DIR: &str = ".trash";
