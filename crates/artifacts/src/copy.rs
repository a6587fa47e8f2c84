//! Inbound stream to output stream copying.

use crate::error::ArtifactResult;
use crate::layout::ArtifactOutputStream;
use bytes::{Bytes, BytesMut};
use depot_core::Repository;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// Inbound request body.
pub type InboundStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Write size used when coalescing small inbound chunks.
pub const COALESCED_WRITE_SIZE: usize = 1024 * 1024;

/// How bytes move from the inbound stream into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Every inbound chunk is written as received.
    Direct,
    /// Inbound chunks are gathered into writes of `write_size` bytes.
    Coalescing { write_size: usize },
}

impl CopyStrategy {
    /// Hosted deployments arrive in large request chunks; proxied content
    /// trickles in from upstream and is coalesced.
    pub fn for_repository(repository: &Repository) -> Self {
        if repository.is_proxy() {
            Self::Coalescing {
                write_size: COALESCED_WRITE_SIZE,
            }
        } else {
            Self::Direct
        }
    }

    /// Copy `input` to the end. Returns the bytes copied.
    ///
    /// A failing inbound stream surfaces as [`ArtifactError::Inbound`];
    /// the output is left open for the caller to abort.
    ///
    /// [`ArtifactError::Inbound`]: crate::error::ArtifactError::Inbound
    pub async fn copy(
        &self,
        input: &mut InboundStream,
        output: &mut ArtifactOutputStream,
    ) -> ArtifactResult<u64> {
        let start = output.bytes_written();
        match *self {
            Self::Direct => {
                while let Some(chunk) = input.next().await {
                    output.write(chunk?).await?;
                }
            }
            Self::Coalescing { write_size } => {
                let mut pending = BytesMut::with_capacity(write_size);
                while let Some(chunk) = input.next().await {
                    pending.extend_from_slice(&chunk?);
                    if pending.len() >= write_size {
                        output.write(pending.split().freeze()).await?;
                    }
                }
                if !pending.is_empty() {
                    output.write(pending.freeze()).await?;
                }
            }
        }
        Ok(output.bytes_written() - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArtifactError;
    use async_trait::async_trait;
    use depot_storage::{StorageResult, StreamingUpload};
    use std::sync::{Arc, Mutex};

    /// Records the size of every write.
    struct RecordingUpload {
        writes: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl StreamingUpload for RecordingUpload {
        async fn write(&mut self, data: Bytes) -> StorageResult<()> {
            self.writes.lock().unwrap().push(data.len());
            Ok(())
        }

        async fn finish(self: Box<Self>) -> StorageResult<u64> {
            Ok(self.writes.lock().unwrap().iter().sum::<usize>() as u64)
        }

        async fn abort(self: Box<Self>) -> StorageResult<()> {
            Ok(())
        }
    }

    fn output() -> (ArtifactOutputStream, Arc<Mutex<Vec<usize>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let upload = RecordingUpload {
            writes: writes.clone(),
        };
        (ArtifactOutputStream::new(Box::new(upload), &[], false), writes)
    }

    fn chunks(count: usize, size: usize) -> InboundStream {
        let items: Vec<std::io::Result<Bytes>> =
            (0..count).map(|_| Ok(Bytes::from(vec![7u8; size]))).collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_direct_copy_keeps_chunking() {
        let (mut out, writes) = output();
        let copied = CopyStrategy::Direct
            .copy(&mut chunks(3, 10), &mut out)
            .await
            .unwrap();
        assert_eq!(copied, 30);
        assert_eq!(*writes.lock().unwrap(), vec![10, 10, 10]);
    }

    #[tokio::test]
    async fn test_coalescing_copy_batches_writes() {
        let (mut out, writes) = output();
        let strategy = CopyStrategy::Coalescing { write_size: 25 };
        let copied = strategy.copy(&mut chunks(6, 10), &mut out).await.unwrap();
        assert_eq!(copied, 60);
        assert_eq!(*writes.lock().unwrap(), vec![30, 30]);
    }

    #[tokio::test]
    async fn test_inbound_failure_surfaces() {
        let (mut out, _writes) = output();
        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let mut input: InboundStream = Box::pin(futures::stream::iter(items));

        let err = CopyStrategy::Direct
            .copy(&mut input, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Inbound(_)));
        out.abort().await.unwrap();
    }
}
