//! The depot artifact pipeline.
//!
//! This crate provides:
//! - Layout strategies (Maven 2, NuGet) and their registry
//! - The checksum reconciliation cache
//! - Version and operation validators
//! - Lifecycle events
//! - [`ArtifactManagementService`], which ties them to the object store and
//!   the artifact index
//! - Timestamped snapshot retention

pub mod checksum_cache;
pub mod copy;
pub mod error;
pub mod events;
pub mod layout;
pub mod management;
pub mod metrics;
pub mod snapshot;
pub mod validators;

pub use checksum_cache::ChecksumCache;
pub use copy::{CopyStrategy, InboundStream};
pub use error::{ArtifactError, ArtifactResult};
pub use events::{ArtifactEvent, ArtifactEventListener, ArtifactEventType, EventRegistry};
pub use layout::{
    ArtifactInputStream, FileKind, LayoutContext, LayoutProvider, LayoutRegistry, ResolvedPath,
};
pub use management::{ArtifactManagementService, Reconciliation};
pub use snapshot::{RetentionPolicy, RetentionReport};

use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::ObjectStore;
use std::sync::Arc;

/// Build the service from configuration: object store, index, checksum cache
/// (with its background sweeper) and the given listeners.
pub async fn from_config(
    config: &AppConfig,
    events: EventRegistry,
) -> ArtifactResult<ArtifactManagementService> {
    let configuration = config.configuration()?;

    metrics::register_metrics();

    let objects = depot_storage::from_config(&config.object_store).await?;
    objects.health_check().await?;

    let index = depot_metadata::from_config(&config.metadata).await?;
    index.health_check().await?;

    let checksum_cache = Arc::new(ChecksumCache::new(config.checksum_cache.ttl()));
    let _sweeper_handle = checksum_cache
        .clone()
        .spawn_sweeper(config.checksum_cache.sweep_interval());

    tracing::info!(
        storages = configuration.storages().count(),
        repositories = configuration.repositories().count(),
        listeners = events.len(),
        "Artifact service ready"
    );

    Ok(ArtifactManagementService::new(
        Arc::new(configuration),
        LayoutContext::new(objects, index),
        checksum_cache,
        events,
    ))
}
