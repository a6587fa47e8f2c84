//! Acceptance checks run before any bytes move.
//!
//! Version validators judge coordinates against a repository's policy.
//! Operation checks cover the path itself and the repository's deployment,
//! redeployment and deletion permissions.

use crate::error::{ArtifactError, ArtifactResult};
use crate::layout::FileKind;
use depot_core::path::validate_relative_path;
use depot_core::{ArtifactCoordinates, LayoutFormat, Repository, RepositoryPolicy};
use std::fmt;
use std::sync::Arc;

/// A version policy check.
pub trait VersionValidator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the validator applies to `repository`.
    fn supports(&self, repository: &Repository) -> bool;

    fn validate(
        &self,
        repository: &Repository,
        coordinates: &ArtifactCoordinates,
    ) -> ArtifactResult<()>;
}

/// Release repositories reject snapshot and prerelease versions.
#[derive(Debug, Default)]
pub struct ReleaseVersionValidator;

impl VersionValidator for ReleaseVersionValidator {
    fn name(&self) -> &'static str {
        "release-version"
    }

    fn supports(&self, repository: &Repository) -> bool {
        repository.policy == RepositoryPolicy::Release
    }

    fn validate(
        &self,
        repository: &Repository,
        coordinates: &ArtifactCoordinates,
    ) -> ArtifactResult<()> {
        if coordinates.is_snapshot() {
            return Err(ArtifactError::VersionValidation(format!(
                "snapshot version {} cannot be deployed to release repository {}",
                coordinates.version(),
                repository.id
            )));
        }
        Ok(())
    }
}

/// Snapshot repositories reject release versions.
#[derive(Debug, Default)]
pub struct SnapshotVersionValidator;

impl VersionValidator for SnapshotVersionValidator {
    fn name(&self) -> &'static str {
        "snapshot-version"
    }

    fn supports(&self, repository: &Repository) -> bool {
        repository.policy == RepositoryPolicy::Snapshot
    }

    fn validate(
        &self,
        repository: &Repository,
        coordinates: &ArtifactCoordinates,
    ) -> ArtifactResult<()> {
        if !coordinates.is_snapshot() {
            return Err(ArtifactError::VersionValidation(format!(
                "release version {} cannot be deployed to snapshot repository {}",
                coordinates.version(),
                repository.id
            )));
        }
        Ok(())
    }
}

/// Maven file names must carry the version of their directory.
#[derive(Debug, Default)]
pub struct MavenVersionFormatValidator;

impl VersionValidator for MavenVersionFormatValidator {
    fn name(&self) -> &'static str {
        "maven-version-format"
    }

    fn supports(&self, repository: &Repository) -> bool {
        repository.layout == LayoutFormat::Maven2
    }

    fn validate(
        &self,
        _repository: &Repository,
        coordinates: &ArtifactCoordinates,
    ) -> ArtifactResult<()> {
        match coordinates {
            ArtifactCoordinates::Maven(maven) if !maven.file_version_matches() => {
                Err(ArtifactError::VersionValidation(format!(
                    "file version {} does not belong to version directory {}",
                    maven.file_version, maven.version
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Ordered, immutable list of version validators.
#[derive(Clone)]
pub struct ValidatorChain {
    validators: Arc<[Arc<dyn VersionValidator>]>,
}

impl ValidatorChain {
    pub fn new(validators: Vec<Arc<dyn VersionValidator>>) -> Self {
        Self {
            validators: validators.into(),
        }
    }

    /// Release, snapshot, then Maven version format.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(ReleaseVersionValidator),
            Arc::new(SnapshotVersionValidator),
            Arc::new(MavenVersionFormatValidator),
        ])
    }

    /// Run every supporting validator, then fail with the first violation.
    pub fn validate(
        &self,
        repository: &Repository,
        coordinates: &ArtifactCoordinates,
    ) -> ArtifactResult<()> {
        let mut first_violation = None;
        for validator in self
            .validators
            .iter()
            .filter(|v| v.supports(repository))
        {
            if let Err(e) = validator.validate(repository, coordinates) {
                tracing::info!(
                    validator = validator.name(),
                    storage_id = %repository.storage_id,
                    repository_id = %repository.id,
                    coordinates = %coordinates,
                    error = %e,
                    "Version validation failed"
                );
                first_violation.get_or_insert(e);
            }
        }
        match first_violation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for ValidatorChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.validators.iter().map(|v| v.name()))
            .finish()
    }
}

/// Path and permission checks.
pub struct ArtifactOperationsValidator;

impl ArtifactOperationsValidator {
    pub fn validate_path(path: &str) -> ArtifactResult<()> {
        validate_relative_path(path)?;
        Ok(())
    }

    pub fn check_deployment(repository: &Repository) -> ArtifactResult<()> {
        if repository.is_group() {
            return Err(ArtifactError::AcceptanceDenied(format!(
                "repository {} is a group repository",
                repository.id
            )));
        }
        if !repository.in_service {
            return Err(ArtifactError::AcceptanceDenied(format!(
                "repository {} is out of service",
                repository.id
            )));
        }
        if !repository.allows_deployment {
            return Err(ArtifactError::AcceptanceDenied(format!(
                "repository {} does not allow deployment",
                repository.id
            )));
        }
        Ok(())
    }

    /// Release repositories without redeployment keep existing artifacts.
    pub fn check_redeployment(
        repository: &Repository,
        kind: FileKind,
        path: &str,
        exists: bool,
    ) -> ArtifactResult<()> {
        if exists
            && kind == FileKind::Artifact
            && repository.policy == RepositoryPolicy::Release
            && !repository.allows_redeployment
        {
            return Err(ArtifactError::AcceptanceDenied(format!(
                "repository {} does not allow redeployment of {path}",
                repository.id
            )));
        }
        Ok(())
    }

    /// Returns the `force` flag the delete runs with. A force the repository
    /// does not allow degrades to an ordinary, trash-honouring delete.
    pub fn check_deletion(repository: &Repository, force: bool) -> ArtifactResult<bool> {
        if !repository.allows_deletion {
            return Err(ArtifactError::AcceptanceDenied(format!(
                "repository {} does not allow deletion",
                repository.id
            )));
        }
        if force && !repository.allows_force_deletion {
            tracing::warn!(
                repository_id = %repository.id,
                "Forced deletion not allowed, deleting normally"
            );
            return Ok(false);
        }
        Ok(force)
    }
}
