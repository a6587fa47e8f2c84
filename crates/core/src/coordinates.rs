//! Structured artifact identity extracted from repository paths.
//!
//! Coordinates are produced by the layout that owns a repository. The
//! pipeline only needs equality, a rendering for logs and the version, so
//! each format keeps its own parser here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix marking a Maven snapshot version directory.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Format-specific artifact coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ArtifactCoordinates {
    Maven(MavenCoordinates),
    Nuget(NugetCoordinates),
}

impl ArtifactCoordinates {
    /// The declared version (the directory version for Maven).
    pub fn version(&self) -> &str {
        match self {
            Self::Maven(c) => &c.version,
            Self::Nuget(c) => &c.version,
        }
    }

    /// Whether the version denotes a snapshot or prerelease.
    pub fn is_snapshot(&self) -> bool {
        match self {
            Self::Maven(c) => c.is_snapshot(),
            Self::Nuget(c) => c.is_prerelease(),
        }
    }
}

impl fmt::Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maven(c) => c.fmt(f),
            Self::Nuget(c) => c.fmt(f),
        }
    }
}

/// A timestamped snapshot revision (`yyyyMMdd.HHmmss-N`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotRevision {
    /// Raw timestamp, `yyyyMMdd.HHmmss`. Sorts chronologically as a string.
    pub timestamp: String,
    pub build_number: u32,
}

impl SnapshotRevision {
    /// Parse `yyyyMMdd.HHmmss-N`.
    pub fn parse(s: &str) -> Option<Self> {
        let (timestamp, build) = s.rsplit_once('-')?;
        let (date, clock) = timestamp.split_once('.')?;
        if date.len() != 8
            || clock.len() != 6
            || !date.bytes().all(|b| b.is_ascii_digit())
            || !clock.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            timestamp: timestamp.to_string(),
            build_number: build.parse().ok()?,
        })
    }
}

impl fmt::Display for SnapshotRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp, self.build_number)
    }
}

/// Maven coordinates: `groupId/as/path/artifactId/version/file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MavenCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    /// Version directory, e.g. `1.0-SNAPSHOT`.
    pub version: String,
    /// Version as spelled in the file name, e.g. `1.0-20240101.120000-3`.
    pub file_version: String,
    pub classifier: Option<String>,
    pub extension: String,
}

impl MavenCoordinates {
    /// Parse a repository-relative Maven path.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || Error::InvalidCoordinates(format!("not a maven artifact path: {path}"));

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 4 || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        let file_name = segments[segments.len() - 1];
        let version = segments[segments.len() - 2];
        let artifact_id = segments[segments.len() - 3];
        let group_id = segments[..segments.len() - 3].join(".");

        let rest = file_name
            .strip_prefix(artifact_id)
            .and_then(|r| r.strip_prefix('-'))
            .ok_or_else(invalid)?;

        let (file_version, remainder) = split_file_version(version, rest).ok_or_else(invalid)?;

        let (classifier, extension) = if let Some(tail) = remainder.strip_prefix('-') {
            let (classifier, extension) = tail.split_once('.').ok_or_else(invalid)?;
            if classifier.is_empty() {
                return Err(invalid());
            }
            (Some(classifier.to_string()), extension)
        } else if let Some(extension) = remainder.strip_prefix('.') {
            (None, extension)
        } else {
            return Err(invalid());
        };

        if extension.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            group_id,
            artifact_id: artifact_id.to_string(),
            version: version.to_string(),
            file_version: file_version.to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }

    /// Whether the version directory is a snapshot.
    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with(SNAPSHOT_SUFFIX)
    }

    /// The base version, without `-SNAPSHOT`.
    pub fn base_version(&self) -> &str {
        self.version
            .strip_suffix(SNAPSHOT_SUFFIX)
            .unwrap_or(&self.version)
    }

    /// The timestamped revision, if the file version is one.
    pub fn timestamped_revision(&self) -> Option<SnapshotRevision> {
        if !self.is_snapshot() {
            return None;
        }
        let tail = self
            .file_version
            .strip_prefix(self.base_version())?
            .strip_prefix('-')?;
        SnapshotRevision::parse(tail)
    }

    /// Whether the file version belongs to the version directory.
    pub fn file_version_matches(&self) -> bool {
        self.file_version == self.version || self.timestamped_revision().is_some()
    }
}

/// Split `<fileVersion><remainder>` where remainder starts with `-` or `.`.
fn split_file_version<'a>(version: &str, rest: &'a str) -> Option<(&'a str, &'a str)> {
    // `1.0` must not swallow the head of `1.0.1`.
    if let Some(remainder) = rest.strip_prefix(version)
        && (remainder.starts_with('-')
            || (remainder.starts_with('.')
                && !remainder[1..].starts_with(|c: char| c.is_ascii_digit())))
    {
        return Some((&rest[..version.len()], remainder));
    }

    if let Some(base) = version.strip_suffix(SNAPSHOT_SUFFIX)
        && let Some(tail) = rest.strip_prefix(base).and_then(|t| t.strip_prefix('-'))
    {
        // base-yyyyMMdd.HHmmss-N
        let stamp_len = "yyyyMMdd.HHmmss-".len();
        if let Some(build) = tail.get(stamp_len..)
            && !build.is_empty()
        {
            let digits_end = build
                .find(|c: char| !c.is_ascii_digit())
                .map_or(tail.len(), |i| stamp_len + i);
            if SnapshotRevision::parse(&tail[..digits_end]).is_some() {
                let end = base.len() + 1 + digits_end;
                return Some((&rest[..end], &rest[end..]));
            }
        }
    }

    // Unknown version spelling: everything up to the extension.
    let dot = rest.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some((&rest[..dot], &rest[dot..]))
}

impl fmt::Display for MavenCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.file_version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        write!(f, "@{}", self.extension)
    }
}

/// NuGet coordinates: `id/version/id.version.nupkg`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NugetCoordinates {
    pub id: String,
    pub version: String,
    pub extension: String,
}

impl NugetCoordinates {
    /// Parse a repository-relative NuGet path.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || Error::InvalidCoordinates(format!("not a nuget package path: {path}"));

        let mut segments = path.split('/');
        let (Some(id), Some(version), Some(file_name), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };
        if id.is_empty() || version.is_empty() {
            return Err(invalid());
        }

        let lower = file_name.to_ascii_lowercase();
        let id_lower = id.to_ascii_lowercase();
        let prefix = format!("{id_lower}.{}.", version.to_ascii_lowercase());
        let extension = if let Some(ext) = lower.strip_prefix(&prefix) {
            ext
        } else if lower == format!("{id_lower}.nuspec") {
            "nuspec"
        } else {
            return Err(invalid());
        };
        if extension.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            id: id.to_string(),
            version: version.to_string(),
            extension: extension.to_string(),
        })
    }

    /// SemVer prerelease versions carry a `-` label.
    pub fn is_prerelease(&self) -> bool {
        self.version.contains('-')
    }
}

impl fmt::Display for NugetCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.id, self.version, self.extension)
    }
}
