//! Maven 2 repository layout.

use super::{LayoutContext, LayoutProvider};
use crate::error::ArtifactResult;
use async_trait::async_trait;
use depot_core::path::file_name;
use depot_core::{ArtifactCoordinates, DigestAlgorithm, LayoutFormat, MavenCoordinates};

/// `maven-metadata.xml`, plus the per-repository `maven-metadata-<id>.xml`.
const METADATA_FILE: &str = "maven-metadata.xml";
const METADATA_PREFIX: &str = "maven-metadata-";

const DIGESTS: [DigestAlgorithm; 2] = [DigestAlgorithm::Md5, DigestAlgorithm::Sha1];

/// `groupId/as/path/artifactId/version/artifactId-version[-classifier].ext`
pub struct MavenLayout {
    context: LayoutContext,
}

impl MavenLayout {
    pub fn new(context: LayoutContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl LayoutProvider for MavenLayout {
    fn format(&self) -> LayoutFormat {
        LayoutFormat::Maven2
    }

    fn context(&self) -> &LayoutContext {
        &self.context
    }

    fn digest_algorithms(&self) -> &[DigestAlgorithm] {
        &DIGESTS
    }

    fn checksum_algorithms(&self) -> &[DigestAlgorithm] {
        &DigestAlgorithm::ALL
    }

    fn is_metadata_file(&self, path: &str) -> bool {
        let name = file_name(path);
        name == METADATA_FILE || (name.starts_with(METADATA_PREFIX) && name.ends_with(".xml"))
    }

    fn extract_coordinates(&self, path: &str) -> ArtifactResult<ArtifactCoordinates> {
        Ok(ArtifactCoordinates::Maven(MavenCoordinates::parse(path)?))
    }
}
