//! NuGet repository layout.

use super::{LayoutContext, LayoutProvider, ResolvedPath};
use crate::error::{ArtifactError, ArtifactResult};
use async_trait::async_trait;
use depot_core::{ArtifactCoordinates, DigestAlgorithm, LayoutFormat, NugetCoordinates};

const DIGESTS: [DigestAlgorithm; 1] = [DigestAlgorithm::Sha512];

/// `id/version/id.version.nupkg`, with `id.nuspec` metadata alongside.
pub struct NugetLayout {
    context: LayoutContext,
}

impl NugetLayout {
    pub fn new(context: LayoutContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl LayoutProvider for NugetLayout {
    fn format(&self) -> LayoutFormat {
        LayoutFormat::Nuget
    }

    fn context(&self) -> &LayoutContext {
        &self.context
    }

    fn digest_algorithms(&self) -> &[DigestAlgorithm] {
        &DIGESTS
    }

    fn checksum_algorithms(&self) -> &[DigestAlgorithm] {
        &DIGESTS
    }

    fn is_metadata_file(&self, path: &str) -> bool {
        path.to_ascii_lowercase().ends_with(".nuspec")
    }

    fn extract_coordinates(&self, path: &str) -> ArtifactResult<ArtifactCoordinates> {
        Ok(ArtifactCoordinates::Nuget(NugetCoordinates::parse(path)?))
    }

    async fn contains(&self, _target: &ResolvedPath) -> ArtifactResult<bool> {
        Err(ArtifactError::Unsupported(
            "contains is not implemented for nuget repositories".to_string(),
        ))
    }

    async fn copy(&self, _source: &ResolvedPath, _destination: &ResolvedPath) -> ArtifactResult<u64> {
        Err(ArtifactError::Unsupported(
            "copy is not implemented for nuget repositories".to_string(),
        ))
    }
}
