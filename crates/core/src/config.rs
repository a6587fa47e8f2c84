//! Configuration types shared across crates.

use crate::error::{Error, Result};
use crate::repository::{Configuration, StorageDefinition};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Object store backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory; repository basedirs are keys below it.
        path: PathBuf,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Artifact index store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Slow query warning threshold in seconds. SQLite cannot cancel
        /// running statements, so this only logs.
        #[serde(default)]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer DEPOT_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Server-side statement timeout in milliseconds.
        #[serde(default)]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: None,
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                max_connections,
                ..
            } => {
                if *max_connections == 0 {
                    return Err("metadata.max_connections must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Checksum reconciliation cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecksumCacheConfig {
    /// Seconds an unreconciled entry survives.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Seconds between background eviction sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ChecksumCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl ChecksumCacheConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("checksum_cache.ttl_secs cannot be 0".to_string());
        }
        // tokio::time::interval panics on a zero period.
        if self.sweep_interval_secs == 0 {
            return Err("checksum_cache.sweep_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub object_store: BackendConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub checksum_cache: ChecksumCacheConfig,
    #[serde(default)]
    pub storages: Vec<StorageDefinition>,
}

impl AppConfig {
    /// Configuration rooted in a scratch directory, with no storages.
    ///
    /// **For testing only.**
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            object_store: BackendConfig::Filesystem {
                path: root.join("storage"),
            },
            metadata: MetadataConfig::Sqlite {
                path: root.join("metadata.db"),
                query_timeout_secs: None,
            },
            checksum_cache: ChecksumCacheConfig::default(),
            storages: Vec::new(),
        }
    }

    /// Validate every section and build the repository provider.
    pub fn configuration(&self) -> Result<Configuration> {
        self.metadata.validate().map_err(Error::Config)?;
        self.checksum_cache.validate().map_err(Error::Config)?;
        Configuration::from_definitions(&self.storages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{LayoutFormat, RepositoryKind, RepositoryPolicy};
    use figment::Figment;
    use figment::providers::{Format, Toml};

    const SAMPLE: &str = r#"
        [object_store]
        type = "filesystem"
        path = "/var/lib/depot"

        [metadata]
        type = "sqlite"
        path = "/var/lib/depot/metadata.db"

        [checksum_cache]
        ttl_secs = 60

        [[storages]]
        id = "storage0"

        [[storages.repositories]]
        id = "releases"
        layout = "maven2"
        policy = "release"

        [[storages.repositories]]
        id = "central"
        layout = "maven2"
        type = "proxy"
        allows_deployment = false

        [[storages.repositories]]
        id = "nuget"
        layout = "nuget"
        trash_enabled = true
    "#;

    #[test]
    fn test_load_from_toml() {
        let config: AppConfig = Figment::from(Toml::string(SAMPLE)).extract().unwrap();
        assert_eq!(config.checksum_cache.ttl_secs, 60);
        assert_eq!(config.checksum_cache.sweep_interval_secs, 300);

        let provider = config.configuration().unwrap();
        let releases = provider.repository("storage0", "releases").unwrap();
        assert_eq!(releases.policy, RepositoryPolicy::Release);
        assert_eq!(releases.kind, RepositoryKind::Hosted);

        let central = provider.repository("storage0", "central").unwrap();
        assert!(central.is_proxy());
        assert!(!central.accepts_writes());

        let nuget = provider.repository("storage0", "nuget").unwrap();
        assert_eq!(nuget.layout, LayoutFormat::Nuget);
        assert_eq!(nuget.policy, RepositoryPolicy::Mixed);
        assert!(nuget.trash_enabled);
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config: AppConfig = Figment::from(Toml::string("")).extract().unwrap();
        assert!(matches!(config.object_store, BackendConfig::Filesystem { .. }));
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
        assert!(config.storages.is_empty());
        assert!(config.configuration().is_ok());
    }

    #[test]
    fn test_checksum_cache_validation() {
        let zero_ttl = ChecksumCacheConfig {
            ttl_secs: 0,
            ..Default::default()
        };
        assert!(zero_ttl.validate().is_err());

        let zero_sweep = ChecksumCacheConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(zero_sweep.validate().is_err());
        assert!(ChecksumCacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_postgres_validation() {
        let missing_db = MetadataConfig::Postgres {
            url: None,
            host: Some("localhost".to_string()),
            port: Some(5432),
            username: None,
            password: None,
            database: None,
            ssl_mode: None,
            max_connections: 10,
            statement_timeout_ms: None,
        };
        assert!(missing_db.validate().is_err());

        let with_url: MetadataConfig = serde_json::from_str(
            r#"{"type":"postgres","url":"postgres://localhost/depot"}"#,
        )
        .unwrap();
        assert!(with_url.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_surfaces_in_configuration() {
        let mut config = AppConfig::for_testing("/tmp/depot");
        config.checksum_cache.ttl_secs = 0;
        assert!(matches!(config.configuration(), Err(Error::Config(_))));
    }
}
