//! Object storage abstraction and backends for depot.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait the repository layouts write through
//! - Atomic streaming uploads (temp file, fsync, rename)
//! - A local filesystem backend with path traversal protection

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload, TEMP_MARKER};

use depot_core::config::BackendConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &BackendConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config {
        BackendConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            tracing::info!(root = %path.display(), "Filesystem object store ready");
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = BackendConfig::Filesystem {
            path: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        let mut upload = store.put_stream("hello.txt").await.unwrap();
        upload.write(Bytes::from_static(b"hi")).await.unwrap();
        upload.finish().await.unwrap();
        assert!(store.exists("hello.txt").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
        store.health_check().await.unwrap();
    }
}
