//! Atlas model tooling - Main entry point

use anyhow::{Context, Result};
use atlas_models::{
    ModelKind, ModelManager, ReloadTarget, StorageConfig, storage::ModelMetadata,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "atlas-models")]
#[command(about = "Shared model storage and lifecycle tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a model into the local cache
    Fetch {
        /// Model artifact name (e.g. yolov8m.pt)
        name: String,

        /// Specific version; defaults to latest
        #[arg(long)]
        version: Option<String>,

        /// Re-download even when cached
        #[arg(long)]
        force: bool,
    },

    /// Upload a model artifact and publish it as latest
    Upload {
        /// Local path to the artifact
        path: PathBuf,

        /// Model artifact name
        name: String,

        /// Version label (e.g. v1.2.0)
        version: String,

        /// Model accuracy recorded in the metadata sidecar
        #[arg(long)]
        accuracy: Option<f64>,
    },

    /// List available versions of a model, newest first
    Versions {
        /// Model artifact name
        name: String,
    },

    /// Print the metadata sidecar of a model
    Metadata {
        /// Model artifact name
        name: String,
    },

    /// Remove all locally cached model artifacts
    ClearCache,

    /// Initialize all model services and print the manager snapshot
    Info,

    /// Reload model services from storage
    Reload {
        /// Single model type to reload (text, visual, audio); all when omitted
        #[arg(long)]
        model: Option<ModelKind>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    // Load configuration
    let config = StorageConfig::load(cli.config)?;
    config.validate()?;

    tracing::info!(
        mode = %config.storage_mode,
        cache_dir = ?config.cache_dir,
        bucket = %config.bucket,
        "Configuration loaded"
    );

    let manager = ModelManager::new(&config).context("Failed to construct model manager")?;

    match cli.command {
        Command::Fetch {
            name,
            version,
            force,
        } => {
            match manager
                .storage()
                .get_model(&name, version.as_deref(), force)
                .await
            {
                Some(path) => println!("{}", path.display()),
                None => anyhow::bail!("model {} is not available", name),
            }
        }

        Command::Upload {
            path,
            name,
            version,
            accuracy,
        } => {
            let metadata = ModelMetadata {
                model_name: Some(name.clone()),
                accuracy,
                ..Default::default()
            };
            let report = manager
                .storage()
                .upload_model(&path, &name, &version, Some(metadata))
                .await
                .context("Upload failed")?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.complete() {
                anyhow::bail!("upload of {} {} completed partially", name, version);
            }
        }

        Command::Versions { name } => {
            for version in manager.storage().list_model_versions(&name).await {
                println!("{}", version);
            }
        }

        Command::Metadata { name } => match manager.storage().get_model_metadata(&name).await {
            Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
            None => anyhow::bail!("no metadata for model {}", name),
        },

        Command::ClearCache => {
            manager
                .storage()
                .clear_cache()
                .await
                .context("Failed to clear model cache")?;
        }

        Command::Info => {
            if let Err(err) = manager.ensure_ready().await {
                tracing::error!(error = %err, "Initialization failed");
            }
            let info = manager.info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Reload { model } => {
            manager.ensure_ready().await?;
            let target = match model {
                Some(kind) => ReloadTarget::One(kind),
                None => ReloadTarget::All,
            };
            let report = manager.reload(target).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.all_swapped() {
                anyhow::bail!("one or more model services did not reload");
            }
        }
    }

    Ok(())
}
