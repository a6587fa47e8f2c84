//! Storages, repositories and the read-only configuration provider.

use crate::error::{Error, Result};
use crate::path::{join, validate_id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Artifact format served by a repository; selects its layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutFormat {
    #[serde(alias = "maven")]
    Maven2,
    Nuget,
}

impl LayoutFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maven2 => "maven2",
            Self::Nuget => "nuget",
        }
    }
}

impl fmt::Display for LayoutFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which version kinds a repository accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryPolicy {
    Release,
    Snapshot,
    #[default]
    Mixed,
}

impl RepositoryPolicy {
    pub fn accepts_releases(self) -> bool {
        matches!(self, Self::Release | Self::Mixed)
    }

    pub fn accepts_snapshots(self) -> bool {
        matches!(self, Self::Snapshot | Self::Mixed)
    }
}

impl fmt::Display for RepositoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Release => "release",
            Self::Snapshot => "snapshot",
            Self::Mixed => "mixed",
        })
    }
}

/// Role of a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Accepts deployments directly.
    #[default]
    Hosted,
    /// Caches content fetched from an upstream.
    Proxy,
    /// Aggregates other repositories; never written to.
    Group,
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hosted => "hosted",
            Self::Proxy => "proxy",
            Self::Group => "group",
        })
    }
}

/// Repository as declared in configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RepositoryDefinition {
    pub id: String,
    pub layout: LayoutFormat,
    #[serde(default)]
    pub policy: RepositoryPolicy,
    #[serde(rename = "type", default)]
    pub kind: RepositoryKind,
    #[serde(default = "default_true")]
    pub in_service: bool,
    /// Object-key prefix holding the repository content.
    /// Defaults to `<storage>/<repository>`.
    #[serde(default)]
    pub basedir: Option<String>,
    #[serde(default = "default_true")]
    pub allows_directory_browsing: bool,
    #[serde(default = "default_true")]
    pub allows_deployment: bool,
    #[serde(default)]
    pub allows_redeployment: bool,
    #[serde(default = "default_true")]
    pub allows_deletion: bool,
    #[serde(default)]
    pub allows_force_deletion: bool,
    /// Move deleted content under `<basedir>/.trash` instead of removing it.
    #[serde(default)]
    pub trash_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl RepositoryDefinition {
    /// A hosted repository with default flags.
    pub fn new(id: impl Into<String>, layout: LayoutFormat, policy: RepositoryPolicy) -> Self {
        Self {
            id: id.into(),
            layout,
            policy,
            kind: RepositoryKind::Hosted,
            in_service: true,
            basedir: None,
            allows_directory_browsing: true,
            allows_deployment: true,
            allows_redeployment: false,
            allows_deletion: true,
            allows_force_deletion: false,
            trash_enabled: false,
        }
    }
}

/// Storage as declared in configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageDefinition {
    pub id: String,
    #[serde(default)]
    pub repositories: Vec<RepositoryDefinition>,
}

/// A configured repository bound to its storage.
#[derive(Clone, Debug)]
pub struct Repository {
    pub storage_id: String,
    pub id: String,
    pub layout: LayoutFormat,
    pub policy: RepositoryPolicy,
    pub kind: RepositoryKind,
    pub in_service: bool,
    basedir: String,
    pub allows_directory_browsing: bool,
    pub allows_deployment: bool,
    pub allows_redeployment: bool,
    pub allows_deletion: bool,
    pub allows_force_deletion: bool,
    pub trash_enabled: bool,
}

impl Repository {
    fn from_definition(storage_id: &str, def: RepositoryDefinition) -> Self {
        let basedir = def
            .basedir
            .map(|b| b.trim_matches('/').to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| join(storage_id, &def.id));
        Self {
            storage_id: storage_id.to_string(),
            id: def.id,
            layout: def.layout,
            policy: def.policy,
            kind: def.kind,
            in_service: def.in_service,
            basedir,
            allows_directory_browsing: def.allows_directory_browsing,
            allows_deployment: def.allows_deployment,
            allows_redeployment: def.allows_redeployment,
            allows_deletion: def.allows_deletion,
            allows_force_deletion: def.allows_force_deletion,
            trash_enabled: def.trash_enabled,
        }
    }

    /// Object-key prefix of the repository content.
    pub fn basedir(&self) -> &str {
        &self.basedir
    }

    pub fn is_hosted(&self) -> bool {
        self.kind == RepositoryKind::Hosted
    }

    pub fn is_proxy(&self) -> bool {
        self.kind == RepositoryKind::Proxy
    }

    pub fn is_group(&self) -> bool {
        self.kind == RepositoryKind::Group
    }

    /// Whether the repository takes writes at all.
    pub fn accepts_writes(&self) -> bool {
        self.in_service && self.allows_deployment && !self.is_group()
    }
}

/// A named root grouping repositories.
#[derive(Clone, Debug)]
pub struct Storage {
    pub id: String,
    pub repositories: BTreeMap<String, Arc<Repository>>,
}

impl Storage {
    pub fn repository(&self, repository_id: &str) -> Option<&Arc<Repository>> {
        self.repositories.get(repository_id)
    }
}

/// Read-only storage/repository provider, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    storages: BTreeMap<String, Arc<Storage>>,
}

impl Configuration {
    /// Build the provider, rejecting invalid or duplicate identifiers.
    pub fn from_definitions(definitions: &[StorageDefinition]) -> Result<Self> {
        let mut storages = BTreeMap::new();
        for def in definitions {
            validate_id("storage", &def.id).map_err(|e| Error::Config(e.to_string()))?;
            let mut repositories = BTreeMap::new();
            for repo in &def.repositories {
                validate_id("repository", &repo.id).map_err(|e| Error::Config(e.to_string()))?;
                let repository = Repository::from_definition(&def.id, repo.clone());
                if repositories
                    .insert(repo.id.clone(), Arc::new(repository))
                    .is_some()
                {
                    return Err(Error::Config(format!(
                        "duplicate repository id '{}' in storage '{}'",
                        repo.id, def.id
                    )));
                }
            }
            let storage = Storage {
                id: def.id.clone(),
                repositories,
            };
            if storages.insert(def.id.clone(), Arc::new(storage)).is_some() {
                return Err(Error::Config(format!("duplicate storage id '{}'", def.id)));
            }
        }
        Ok(Self { storages })
    }

    pub fn storage(&self, storage_id: &str) -> Option<&Arc<Storage>> {
        self.storages.get(storage_id)
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Option<&Arc<Repository>> {
        self.storage(storage_id)?.repository(repository_id)
    }

    pub fn storages(&self) -> impl Iterator<Item = &Arc<Storage>> {
        self.storages.values()
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.storages.values().flat_map(|s| s.repositories.values())
    }
}
