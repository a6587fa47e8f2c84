//! Administrative CLI for depot.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_artifacts::events::LoggingListener;
use depot_artifacts::{
    ArtifactEvent, ArtifactEventListener, ArtifactEventType, ArtifactManagementService,
    EventRegistry, InboundStream, RetentionPolicy,
};
use depot_core::config::AppConfig;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Read from stdin / write to stdout.
const STDIO: &str = "-";

#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Administrative CLI for the depot artifact store")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate and store a file
    Put {
        storage: String,
        repository: String,
        path: String,
        /// Source file, or `-` for stdin
        source: String,
    },
    /// Write a stored file to stdout or a file
    Get {
        storage: String,
        repository: String,
        path: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Check whether a path exists
    Contains {
        storage: String,
        repository: String,
        path: String,
    },
    /// Delete a file or directory
    Delete {
        storage: String,
        repository: String,
        path: String,
        /// Bypass the trash
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Copy a file or directory into another repository
    Copy {
        source_storage: String,
        source_repository: String,
        dest_storage: String,
        dest_repository: String,
        path: String,
    },
    /// Remove old timestamped snapshot revisions
    PruneSnapshots {
        storage: String,
        repository: String,
        path: String,
        /// Number of newest revisions to keep (0: no count limit)
        #[arg(long, default_value_t = 0)]
        keep: usize,
        /// Keep revisions younger than this many days (0: no age limit)
        #[arg(long, default_value_t = 0)]
        keep_days: u32,
    },
    /// Load and validate the configuration, then print the repository tree
    CheckConfig,
    /// Print Prometheus metrics in text format
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    // Logs go to stderr so `get` can stream to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&config)?;

    if let Commands::CheckConfig = command {
        return handle_check_config(&config);
    }

    let listeners: Vec<Arc<dyn ArtifactEventListener>> = vec![Arc::new(LoggingListener)];
    let service = depot_artifacts::from_config(&config, EventRegistry::new(listeners))
        .await
        .context("failed to initialize artifact service")?;

    match command {
        Commands::Put {
            storage,
            repository,
            path,
            source,
        } => handle_put(&service, &storage, &repository, &path, &source).await,
        Commands::Get {
            storage,
            repository,
            path,
            output,
        } => handle_get(&service, &storage, &repository, &path, output.as_deref()).await,
        Commands::Contains {
            storage,
            repository,
            path,
        } => {
            let present = service.contains(&storage, &repository, &path).await?;
            println!("{present}");
            Ok(())
        }
        Commands::Delete {
            storage,
            repository,
            path,
            force,
        } => {
            let removed = service.delete(&storage, &repository, &path, force).await?;
            println!("Removed {removed} object(s)");
            Ok(())
        }
        Commands::Copy {
            source_storage,
            source_repository,
            dest_storage,
            dest_repository,
            path,
        } => {
            let copied = service
                .copy(
                    &source_storage,
                    &source_repository,
                    &dest_storage,
                    &dest_repository,
                    &path,
                )
                .await?;
            println!("Copied {copied} object(s)");
            Ok(())
        }
        Commands::PruneSnapshots {
            storage,
            repository,
            path,
            keep,
            keep_days,
        } => {
            let policy = RetentionPolicy::new(keep, time::Duration::days(i64::from(keep_days)));
            let report = service
                .remove_timestamped_snapshots(&storage, &repository, &path, policy)
                .await?;
            for removed in &report.removed {
                println!("{removed}");
            }
            eprintln!(
                "Examined {} snapshot directories, removed {} file(s)",
                report.directories,
                report.removed.len()
            );
            Ok(())
        }
        Commands::Metrics => {
            let text = depot_artifacts::metrics::gather_metrics()
                .context("failed to encode metrics")?;
            print!("{text}");
            Ok(())
        }
        Commands::CheckConfig => Ok(()),
    }
}

/// Load configuration from the file (if present) and `DEPOT_` variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = Path::new(config_path).exists();

    if has_config_file {
        tracing::debug!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // DEPOT_CONFIG only names the file
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DEPOT_") && key != "DEPOT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: depot --config /path/to/depot.toml <command>\n  \
             2. Environment variables: DEPOT_OBJECT_STORE__TYPE=filesystem \
             DEPOT_OBJECT_STORE__PATH=/var/lib/depot depot <command>"
        );
    }

    figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

fn handle_check_config(config: &AppConfig) -> Result<()> {
    let configuration = config
        .configuration()
        .context("invalid repository configuration")?;

    for storage in configuration.storages() {
        println!("{}", storage.id);
        for repository in storage.repositories.values() {
            println!(
                "  {:<24} {:<8} {:<9} {:<7} {}",
                repository.id,
                repository.layout.to_string(),
                repository.policy.to_string(),
                repository.kind.to_string(),
                repository.basedir()
            );
        }
    }
    println!("Configuration OK");
    Ok(())
}

async fn handle_put(
    service: &ArtifactManagementService,
    storage: &str,
    repository: &str,
    path: &str,
    source: &str,
) -> Result<()> {
    let stream: InboundStream = if source == STDIO {
        Box::pin(ReaderStream::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("failed to open {source}"))?;
        Box::pin(ReaderStream::new(file))
    };

    let written = service
        .validate_and_store(storage, repository, path, stream)
        .await
        .with_context(|| format!("failed to store {storage}/{repository}/{path}"))?;
    println!("Stored {written} bytes at {storage}/{repository}/{path}");
    Ok(())
}

async fn handle_get(
    service: &ArtifactManagementService,
    storage: &str,
    repository: &str,
    path: &str,
    output: Option<&str>,
) -> Result<()> {
    let Some(mut stream) = service.resolve_strict(storage, repository, path).await? else {
        anyhow::bail!("{storage}/{repository}/{path} not found");
    };

    let events = service.events();
    events.dispatch(ArtifactEvent::new(
        ArtifactEventType::Downloading,
        storage,
        repository,
        path,
    ));

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(file) if file != STDIO => Box::new(
            tokio::fs::File::create(file)
                .await
                .with_context(|| format!("failed to create {file}"))?,
        ),
        _ => Box::new(tokio::io::stdout()),
    };

    let mut copied = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("failed to read stored file")?;
        writer.write_all(&chunk).await?;
        copied += chunk.len() as u64;
    }
    writer.flush().await?;

    events.dispatch(ArtifactEvent::new(
        ArtifactEventType::Downloaded,
        storage,
        repository,
        path,
    ));

    eprintln!("{copied} bytes");
    for (algorithm, digest) in stream.digests() {
        eprintln!("{algorithm}: {digest}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put() {
        let cli = Cli::try_parse_from([
            "depot",
            "put",
            "storage0",
            "releases",
            "org/example/demo/1.0/demo-1.0.jar",
            "-",
        ])
        .unwrap();
        assert_eq!(cli.config, "config/depot.toml");
        match cli.command {
            Commands::Put { source, path, .. } => {
                assert_eq!(source, "-");
                assert_eq!(path, "org/example/demo/1.0/demo-1.0.jar");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_prune_snapshots() {
        let cli = Cli::try_parse_from([
            "depot",
            "prune-snapshots",
            "storage0",
            "snapshots",
            "org/example",
            "--keep",
            "3",
            "--keep-days",
            "14",
            "--config",
            "/etc/depot.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, "/etc/depot.toml");
        match cli.command {
            Commands::PruneSnapshots {
                keep, keep_days, ..
            } => {
                assert_eq!(keep, 3);
                assert_eq!(keep_days, 14);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_prune_snapshots_rejects_negative_days() {
        let result = Cli::try_parse_from([
            "depot",
            "prune-snapshots",
            "storage0",
            "snapshots",
            "org/example",
            "--keep-days=-1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_force_defaults_off() {
        let cli =
            Cli::try_parse_from(["depot", "delete", "storage0", "releases", "org"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { force: false, .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("depot.toml");
        std::fs::write(
            &file,
            r#"
            [object_store]
            type = "filesystem"
            path = "/tmp/depot"

            [[storages]]
            id = "storage0"

            [[storages.repositories]]
            id = "releases"
            layout = "maven2"
            policy = "release"
            "#,
        )
        .unwrap();

        let config = load_config(file.to_str().unwrap()).unwrap();
        assert_eq!(config.storages.len(), 1);
        assert_eq!(config.storages[0].repositories[0].id, "releases");
        assert!(handle_check_config(&config).is_ok());
    }
}
