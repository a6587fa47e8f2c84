//! Service environment backed by a temp directory.

use depot_artifacts::{
    ArtifactEvent, ArtifactEventListener, ArtifactEventType, ArtifactManagementService,
    ChecksumCache, EventRegistry, LayoutContext,
};
use depot_core::config::AppConfig;
use depot_core::{
    Configuration, LayoutFormat, RepositoryDefinition, RepositoryKind, RepositoryPolicy,
    StorageDefinition,
};
use depot_metadata::MetadataStore;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const STORAGE: &str = "storage0";

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ArtifactEvent>>,
}

#[allow(dead_code)]
impl RecordingListener {
    pub fn events(&self) -> Vec<ArtifactEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event types received for `path`, in order.
    pub fn types_for(&self, path: &str) -> Vec<ArtifactEventType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.path == path)
            .map(|e| e.event_type)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl ArtifactEventListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_event(
        &self,
        event: &ArtifactEvent,
    ) -> Result<(), depot_artifacts::events::ListenerError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Repositories available in every test environment.
pub fn standard_repositories() -> Vec<RepositoryDefinition> {
    vec![
        RepositoryDefinition::new("releases", LayoutFormat::Maven2, RepositoryPolicy::Release),
        RepositoryDefinition::new("snapshots", LayoutFormat::Maven2, RepositoryPolicy::Snapshot),
        RepositoryDefinition::new("staging", LayoutFormat::Maven2, RepositoryPolicy::Mixed),
        RepositoryDefinition {
            allows_deletion: false,
            ..RepositoryDefinition::new("locked", LayoutFormat::Maven2, RepositoryPolicy::Release)
        },
        RepositoryDefinition {
            trash_enabled: true,
            allows_force_deletion: true,
            ..RepositoryDefinition::new("trashed", LayoutFormat::Maven2, RepositoryPolicy::Mixed)
        },
        RepositoryDefinition {
            kind: RepositoryKind::Proxy,
            allows_deployment: false,
            ..RepositoryDefinition::new("central", LayoutFormat::Maven2, RepositoryPolicy::Mixed)
        },
        RepositoryDefinition::new("nuget", LayoutFormat::Nuget, RepositoryPolicy::Mixed),
    ]
}

/// A service wired to a temp directory.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestEnv {
    pub service: Arc<ArtifactManagementService>,
    pub listener: Arc<RecordingListener>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_repositories(standard_repositories()).await
    }

    pub async fn with_repositories(repositories: Vec<RepositoryDefinition>) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        config.storages = vec![StorageDefinition {
            id: STORAGE.to_string(),
            repositories,
        }];

        let listener = Arc::new(RecordingListener::default());
        let events = EventRegistry::new(vec![listener.clone() as Arc<dyn ArtifactEventListener>]);
        let service = depot_artifacts::from_config(&config, events)
            .await
            .expect("Failed to build service");

        Self {
            service: Arc::new(service),
            listener,
            _temp_dir: temp_dir,
        }
    }

    /// Standard repositories over an index decorated by `wrap`.
    pub async fn with_index<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn MetadataStore>) -> Arc<dyn MetadataStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let config = AppConfig::for_testing(temp_dir.path());

        let objects = depot_storage::from_config(&config.object_store)
            .await
            .expect("Failed to open object store");
        let index = depot_metadata::from_config(&config.metadata)
            .await
            .expect("Failed to open index");
        let configuration = Configuration::from_definitions(&[StorageDefinition {
            id: STORAGE.to_string(),
            repositories: standard_repositories(),
        }])
        .expect("Invalid repositories");

        let listener = Arc::new(RecordingListener::default());
        let events = EventRegistry::new(vec![listener.clone() as Arc<dyn ArtifactEventListener>]);
        let service = ArtifactManagementService::new(
            Arc::new(configuration),
            LayoutContext::new(objects, wrap(index)),
            Arc::new(ChecksumCache::new(config.checksum_cache.ttl())),
            events,
        );

        Self {
            service: Arc::new(service),
            listener,
            _temp_dir: temp_dir,
        }
    }

    /// In-flight files (upload temps, backup copies) left under the store.
    pub fn temp_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
            for entry in std::fs::read_dir(dir).expect("Failed to read directory") {
                let path = entry.expect("Failed to read entry").path();
                if path.is_dir() {
                    walk(&path, found);
                } else if path.to_string_lossy().contains(depot_storage::TEMP_MARKER) {
                    found.push(path);
                }
            }
        }
        let mut found = Vec::new();
        walk(&self._temp_dir.path().join("storage"), &mut found);
        found
    }

    /// Checksum cache key of a repository path.
    pub fn cache_key(&self, repository_id: &str, path: &str) -> String {
        self.service
            .resolve_path(STORAGE, repository_id, path)
            .expect("Failed to resolve path")
            .key
    }

    /// Full content of a stored file, if present.
    pub async fn read(&self, repository_id: &str, path: &str) -> Option<bytes::Bytes> {
        let stream = self.service.resolve(STORAGE, repository_id, path).await?;
        Some(stream.read_to_end().await.expect("Failed to read stream"))
    }

    pub async fn index_count(&self, repository_id: &str) -> u64 {
        use depot_metadata::ArtifactEntryRepo;
        self.service
            .index()
            .count_artifact_entries(STORAGE, repository_id)
            .await
            .expect("Failed to count index entries")
    }
}
