//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Marker embedded in the keys of in-flight objects: upload temp files and
/// backup copies. [`ObjectStore::list`] never returns such keys.
pub const TEMP_MARKER: &str = ".tmp.";

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store holding repository content.
///
/// Keys are `/`-separated relative paths. A key names either an object or,
/// for [`list`](ObjectStore::list) and
/// [`delete_prefix`](ObjectStore::delete_prefix), a directory-like prefix.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete every object below a prefix. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64>;

    /// List object keys below a prefix, sorted. An object key lists as itself.
    /// Keys containing [`TEMP_MARKER`] are skipped.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Copy an object, replacing any existing target.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Move an object, replacing any existing target.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Get the name of this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload, publish the object and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
