//! Lifecycle events and the listener registry.

use crate::management::Reconciliation;
use crate::metrics::EVENTS_DISPATCHED;
use std::fmt;
use std::sync::Arc;

/// Lifecycle transition of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactEventType {
    /// A write into a hosted repository is about to start.
    Uploading,
    /// An ordinary artifact file was written.
    Uploaded,
    /// A read, or a proxy write of upstream content, is about to start.
    Downloading,
    /// A read completed.
    Downloaded,
    /// A metadata file was written.
    MetadataFileUpdated,
    /// A metadata file was deployed to a hosted repository.
    MetadataFileUploaded,
    /// A checksum file was written.
    ChecksumFileUpdated,
    /// A non-empty checksum file was received and reconciled.
    ChecksumUploaded,
    /// Content was removed (or moved to the trash).
    Deleted,
}

impl ArtifactEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::MetadataFileUpdated => "metadata_file_updated",
            Self::MetadataFileUploaded => "metadata_file_uploaded",
            Self::ChecksumFileUpdated => "checksum_file_updated",
            Self::ChecksumUploaded => "checksum_uploaded",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ArtifactEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event for one repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEvent {
    pub event_type: ArtifactEventType,
    pub storage_id: String,
    pub repository_id: String,
    pub path: String,
    /// For post-write events: whether the write replaced an existing file.
    pub replaced: bool,
    /// For [`ArtifactEventType::ChecksumUploaded`]: how the checksum compared
    /// with the digests computed when its base file was stored.
    pub reconciliation: Option<Reconciliation>,
}

impl ArtifactEvent {
    pub fn new(
        event_type: ArtifactEventType,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Self {
        Self {
            event_type,
            storage_id: storage_id.to_string(),
            repository_id: repository_id.to_string(),
            path: path.to_string(),
            replaced: false,
            reconciliation: None,
        }
    }

    pub fn replaced(mut self, replaced: bool) -> Self {
        self.replaced = replaced;
        self
    }

    pub fn with_reconciliation(mut self, reconciliation: Reconciliation) -> Self {
        self.reconciliation = Some(reconciliation);
        self
    }
}

/// Error type listeners may return.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives lifecycle events.
///
/// Listeners run inline on the dispatching task, so they should be quick.
pub trait ArtifactEventListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn on_event(&self, event: &ArtifactEvent) -> Result<(), ListenerError>;
}

/// Immutable set of listeners, built once at startup.
#[derive(Clone, Default)]
pub struct EventRegistry {
    listeners: Arc<[Arc<dyn ArtifactEventListener>]>,
}

impl EventRegistry {
    pub fn new(listeners: Vec<Arc<dyn ArtifactEventListener>>) -> Self {
        Self {
            listeners: listeners.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver an event to every listener in registration order.
    ///
    /// A failing listener is logged and does not stop delivery.
    pub fn dispatch(&self, event: ArtifactEvent) {
        EVENTS_DISPATCHED
            .with_label_values(&[event.event_type.as_str()])
            .inc();

        for listener in self.listeners.iter() {
            if let Err(e) = listener.on_event(&event) {
                tracing::warn!(
                    listener = listener.name(),
                    event = %event.event_type,
                    storage_id = %event.storage_id,
                    repository_id = %event.repository_id,
                    path = %event.path,
                    error = %e,
                    "Event listener failed"
                );
            }
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.listeners.iter().map(|l| l.name()))
            .finish()
    }
}

/// Logs every event at debug level.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ArtifactEventListener for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &ArtifactEvent) -> Result<(), ListenerError> {
        tracing::debug!(
            event = %event.event_type,
            storage_id = %event.storage_id,
            repository_id = %event.repository_id,
            path = %event.path,
            replaced = event.replaced,
            reconciliation = event.reconciliation.as_ref().map(Reconciliation::outcome),
            "Artifact event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ArtifactEventListener for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_event(&self, event: &ArtifactEvent) -> Result<(), ListenerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.event_type));
            Ok(())
        }
    }

    struct Failing;

    impl ArtifactEventListener for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_event(&self, _event: &ArtifactEvent) -> Result<(), ListenerError> {
            Err("listener broke".into())
        }
    }

    #[test]
    fn test_dispatch_in_registration_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = EventRegistry::new(vec![
            Arc::new(Recorder {
                name: "first".into(),
                log: log.clone(),
            }),
            Arc::new(Failing),
            Arc::new(Recorder {
                name: "second".into(),
                log: log.clone(),
            }),
        ]);
        assert_eq!(registry.len(), 3);

        registry.dispatch(ArtifactEvent::new(
            ArtifactEventType::Uploading,
            "s",
            "r",
            "a/b",
        ));
        registry.dispatch(ArtifactEvent::new(ArtifactEventType::Uploaded, "s", "r", "a/b"));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:uploading",
                "second:uploading",
                "first:uploaded",
                "second:uploaded"
            ]
        );
    }

    #[test]
    fn test_empty_registry() {
        let registry = EventRegistry::default();
        assert!(registry.is_empty());
        registry.dispatch(ArtifactEvent::new(ArtifactEventType::Deleted, "s", "r", "p"));
    }
}
