//! Layout strategies: one per artifact format.
//!
//! A layout maps repository-relative paths onto object-store keys, tells
//! artifact files apart from metadata and checksum files, extracts
//! coordinates and owns the byte-level operations (streams, existence,
//! deletion, copying) for repositories of its format.

pub mod maven;
pub mod nuget;

pub use maven::MavenLayout;
pub use nuget::NugetLayout;

use crate::error::{ArtifactError, ArtifactResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use depot_core::digest::parse_checksum_text;
use depot_core::path::{join, split_checksum_suffix};
use depot_core::{
    ArtifactCoordinates, DigestAlgorithm, DigestMap, LayoutFormat, MultiDigester, Repository,
    TRASH_DIR,
};
use depot_metadata::{ArtifactEntryRepo, MetadataStore};
use depot_storage::{ByteStream, ObjectStore, StorageError, StreamingUpload};
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// How a layout classifies a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// An ordinary artifact file carrying coordinates.
    Artifact,
    /// A repository metadata file.
    Metadata,
    /// A detached checksum of the file at the base path.
    Checksum(DigestAlgorithm),
}

impl FileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artifact => "artifact",
            Self::Metadata => "metadata",
            Self::Checksum(_) => "checksum",
        }
    }
}

/// A repository path resolved to its object-store key.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub repository: Arc<Repository>,
    /// Repository-relative path. Empty for the repository root.
    pub path: String,
    /// Object-store key.
    pub key: String,
}

impl ResolvedPath {
    pub fn storage_id(&self) -> &str {
        &self.repository.storage_id
    }

    pub fn repository_id(&self) -> &str {
        &self.repository.id
    }

    /// The same location inside another repository.
    pub fn rebase(&self, repository: Arc<Repository>) -> ResolvedPath {
        let key = join(repository.basedir(), &self.path);
        ResolvedPath {
            repository,
            path: self.path.clone(),
            key,
        }
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.repository.storage_id, self.repository.id, self.path
        )
    }
}

/// Digest-computing sink for one file.
///
/// Nothing is visible under the target key until [`finish`](Self::finish).
/// Checksum files are additionally captured in memory so their text can be
/// inspected once the copy is done.
pub struct ArtifactOutputStream {
    upload: Box<dyn StreamingUpload>,
    digester: MultiDigester,
    side_buffer: Option<BytesMut>,
    bytes_written: u64,
}

/// What a finished [`ArtifactOutputStream`] produced.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    pub bytes_written: u64,
    pub digests: DigestMap,
    /// Captured content, for checksum files.
    pub buffered: Option<Bytes>,
}

impl ArtifactOutputStream {
    pub fn new(
        upload: Box<dyn StreamingUpload>,
        algorithms: &[DigestAlgorithm],
        buffer_content: bool,
    ) -> Self {
        Self {
            upload,
            digester: MultiDigester::new(algorithms),
            side_buffer: buffer_content.then(BytesMut::new),
            bytes_written: 0,
        }
    }

    pub async fn write(&mut self, chunk: Bytes) -> ArtifactResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.digester.update(&chunk);
        if let Some(buffer) = self.side_buffer.as_mut() {
            buffer.extend_from_slice(&chunk);
        }
        self.bytes_written += chunk.len() as u64;
        self.upload.write(chunk).await?;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Publish the file and hand back the digests.
    pub async fn finish(self) -> ArtifactResult<WriteSummary> {
        let bytes_written = self.upload.finish().await?;
        Ok(WriteSummary {
            bytes_written,
            digests: self.digester.finalize(),
            buffered: self.side_buffer.map(BytesMut::freeze),
        })
    }

    /// Discard everything written.
    pub async fn abort(self) -> ArtifactResult<()> {
        self.upload.abort().await?;
        Ok(())
    }
}

impl fmt::Debug for ArtifactOutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactOutputStream")
            .field("algorithms", &self.digester.algorithms())
            .field("buffering", &self.side_buffer.is_some())
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

/// Read stream for a stored file, annotated with its known digests.
pub struct ArtifactInputStream {
    stream: ByteStream,
    length: u64,
    digests: DigestMap,
}

impl ArtifactInputStream {
    pub fn new(stream: ByteStream, length: u64, digests: DigestMap) -> Self {
        Self {
            stream,
            length,
            digests,
        }
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// Per-algorithm hex digests taken from the stored checksum files.
    pub fn digests(&self) -> &DigestMap {
        &self.digests
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        self.digests.get(&algorithm).map(String::as_str)
    }

    /// Read the remaining content into memory.
    pub async fn read_to_end(mut self) -> ArtifactResult<Bytes> {
        use futures::StreamExt;

        let mut buffer = BytesMut::with_capacity(self.length as usize);
        while let Some(chunk) = self.stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl Stream for ArtifactInputStream {
    type Item = Result<Bytes, StorageError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ArtifactInputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactInputStream")
            .field("length", &self.length)
            .field("digests", &self.digests)
            .finish_non_exhaustive()
    }
}

/// Stores shared by every layout.
#[derive(Clone)]
pub struct LayoutContext {
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn MetadataStore>,
}

impl LayoutContext {
    pub fn new(objects: Arc<dyn ObjectStore>, index: Arc<dyn MetadataStore>) -> Self {
        Self { objects, index }
    }
}

/// Per-format strategy.
///
/// Implementors supply the naming rules; the byte-level operations have
/// defaults built on those rules and may be overridden where a format
/// behaves differently.
#[async_trait]
pub trait LayoutProvider: Send + Sync {
    fn format(&self) -> LayoutFormat;

    fn context(&self) -> &LayoutContext;

    /// Algorithms computed while writing artifact and metadata files.
    fn digest_algorithms(&self) -> &[DigestAlgorithm];

    /// Algorithms whose detached checksum files the format recognises.
    fn checksum_algorithms(&self) -> &[DigestAlgorithm];

    fn is_metadata_file(&self, path: &str) -> bool;

    fn extract_coordinates(&self, path: &str) -> ArtifactResult<ArtifactCoordinates>;

    fn is_checksum_file(&self, path: &str) -> bool {
        self.checksum_algorithm(path).is_some()
    }

    /// Base path and algorithm of a checksum file.
    fn checksum_algorithm<'a>(&self, path: &'a str) -> Option<(&'a str, DigestAlgorithm)> {
        split_checksum_suffix(path).filter(|(_, alg)| self.checksum_algorithms().contains(alg))
    }

    /// Classify a path. Checksum naming wins over metadata naming.
    fn classify(&self, path: &str) -> FileKind {
        if let Some((_, algorithm)) = self.checksum_algorithm(path) {
            FileKind::Checksum(algorithm)
        } else if self.is_metadata_file(path) {
            FileKind::Metadata
        } else {
            FileKind::Artifact
        }
    }

    /// Object-key prefix holding the repository content.
    fn resolve_repository(&self, repository: &Repository) -> String {
        repository.basedir().to_string()
    }

    fn resolve(&self, repository: &Arc<Repository>, path: &str) -> ResolvedPath {
        let path = path.trim_matches('/').to_string();
        ResolvedPath {
            key: join(&self.resolve_repository(repository), &path),
            repository: repository.clone(),
            path,
        }
    }

    /// Open a digest-computing sink for `target`.
    async fn open_write_stream(
        &self,
        target: &ResolvedPath,
        kind: FileKind,
    ) -> ArtifactResult<ArtifactOutputStream> {
        let upload = self.context().objects.put_stream(&target.key).await?;
        let stream = match kind {
            FileKind::Checksum(_) => ArtifactOutputStream::new(upload, &[], true),
            FileKind::Artifact | FileKind::Metadata => {
                ArtifactOutputStream::new(upload, self.digest_algorithms(), false)
            }
        };
        Ok(stream)
    }

    /// Open a read stream carrying the digests recorded in checksum side files.
    async fn open_read_stream(&self, target: &ResolvedPath) -> ArtifactResult<ArtifactInputStream> {
        let objects = &self.context().objects;
        let meta = objects.head(&target.key).await?;
        let digests = self.stored_digests(target).await?;
        let stream = objects.get_stream(&target.key).await?;
        Ok(ArtifactInputStream::new(stream, meta.size, digests))
    }

    /// Digests read from `<key>.<ext>` side files that exist.
    async fn stored_digests(&self, target: &ResolvedPath) -> ArtifactResult<DigestMap> {
        let objects = &self.context().objects;
        let mut digests = DigestMap::new();
        for &algorithm in self.checksum_algorithms() {
            let side_key = format!("{}.{}", target.key, algorithm.extension());
            match objects.get(&side_key).await {
                Ok(raw) => {
                    if let Some(digest) = parse_checksum_text(&raw) {
                        digests.insert(algorithm, digest);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(digests)
    }

    async fn exists(&self, target: &ResolvedPath) -> ArtifactResult<bool> {
        Ok(self.context().objects.exists(&target.key).await?)
    }

    async fn contains(&self, target: &ResolvedPath) -> ArtifactResult<bool> {
        self.exists(target).await
    }

    /// Remove a file (with its checksum side files) or a whole directory,
    /// together with the index entries below it. Returns the number of
    /// objects removed.
    ///
    /// Unless `force` is set, a repository with a trash moves the content
    /// under `<basedir>/.trash` instead.
    async fn delete(&self, target: &ResolvedPath, force: bool) -> ArtifactResult<u64> {
        let ctx = self.context();
        let repository = &target.repository;
        let basedir = self.resolve_repository(repository);
        let in_trash = target.path == TRASH_DIR || target.path.starts_with(&format!("{TRASH_DIR}/"));
        let to_trash = repository.trash_enabled && !force && !in_trash;

        let is_file = ctx.objects.exists(&target.key).await?;
        let mut removed = 0u64;
        let keys = if is_file {
            let mut keys = vec![target.key.clone()];
            if !self.is_checksum_file(&target.path) {
                for algorithm in self.checksum_algorithms() {
                    let side_key = format!("{}.{}", target.key, algorithm.extension());
                    if ctx.objects.exists(&side_key).await? {
                        keys.push(side_key);
                    }
                }
            }
            keys
        } else if to_trash {
            ctx.objects.list(&target.key).await?
        } else {
            removed = ctx.objects.delete_prefix(&target.key).await?;
            Vec::new()
        };

        for key in &keys {
            if to_trash {
                let relative = key
                    .strip_prefix(basedir.as_str())
                    .unwrap_or(key)
                    .trim_start_matches('/');
                let trash_key = join(&join(&basedir, TRASH_DIR), relative);
                ctx.objects.rename(key, &trash_key).await?;
            } else {
                match ctx.objects.delete(key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            removed += 1;
        }

        let unindexed = ctx
            .index
            .delete_artifact_entries_with_prefix(
                &repository.storage_id,
                &repository.id,
                &target.path,
            )
            .await?;
        // Side files of a single file are not below its path.
        if is_file {
            for key in keys.iter().skip(1) {
                let relative = key
                    .strip_prefix(basedir.as_str())
                    .unwrap_or(key)
                    .trim_start_matches('/');
                ctx.index
                    .delete_artifact_entry(&repository.storage_id, &repository.id, relative)
                    .await?;
            }
        }

        tracing::debug!(
            target = %target,
            removed = removed,
            unindexed = unindexed,
            trash = to_trash,
            "Deleted repository content"
        );
        Ok(removed)
    }

    /// Copy a file or directory to the same relative location in another
    /// repository. Returns the number of objects copied.
    async fn copy(&self, source: &ResolvedPath, destination: &ResolvedPath) -> ArtifactResult<u64> {
        let objects = &self.context().objects;
        let keys = objects.list(&source.key).await?;
        if keys.is_empty() {
            return Err(StorageError::NotFound(source.key.clone()).into());
        }

        let trash_prefix = join(&self.resolve_repository(&source.repository), TRASH_DIR);
        let mut copied = 0u64;
        for key in &keys {
            if key == &trash_prefix || key.starts_with(&format!("{trash_prefix}/")) {
                continue;
            }
            let suffix = key.strip_prefix(source.key.as_str()).unwrap_or_default();
            let dest_key = format!("{}{}", destination.key, suffix);
            objects.copy(key, &dest_key).await?;
            copied += 1;
        }
        Ok(copied)
    }
}

/// Format tag to layout lookup, built once at startup.
#[derive(Clone, Default)]
pub struct LayoutRegistry {
    providers: HashMap<LayoutFormat, Arc<dyn LayoutProvider>>,
}

impl LayoutRegistry {
    pub fn new(providers: Vec<Arc<dyn LayoutProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.format(), p)).collect(),
        }
    }

    /// Registry with every built-in layout.
    pub fn standard(context: LayoutContext) -> Self {
        Self::new(vec![
            Arc::new(MavenLayout::new(context.clone())),
            Arc::new(NugetLayout::new(context)),
        ])
    }

    pub fn get(&self, format: LayoutFormat) -> ArtifactResult<&Arc<dyn LayoutProvider>> {
        self.providers
            .get(&format)
            .ok_or_else(|| ArtifactError::Unsupported(format!("no layout registered for {format}")))
    }
}

impl fmt::Debug for LayoutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.providers.keys()).finish()
    }
}
