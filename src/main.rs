//! Azure Upload Relay - streams multipart uploads into Azure Blob Storage

use anyhow::Context;
use azure_upload_relay::config::{BackendKind, Config, LogFormat};
use azure_upload_relay::logging::init_subscriber;
use azure_upload_relay::server::Server;
use azure_upload_relay::storage::{
    AzureBlobBackend, AzureBlobConfig, MemoryBackend, StorageBackend,
};
use azure_upload_relay::upload::UploadRelay;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Azure Upload Relay - stream multipart uploads into Azure Blob Storage
#[derive(Parser, Debug)]
#[command(name = "azure-upload-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides the configuration file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::from_env().context("Failed to load configuration from environment")?,
    };

    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format.as_deref() {
        config.logging.format = match format {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
    }

    init_subscriber(&config.logging)?;

    info!("Starting Azure Upload Relay v{}", azure_upload_relay::VERSION);

    let backend: Arc<dyn StorageBackend> = match config.storage.backend {
        BackendKind::Azure => {
            let azure = AzureBlobBackend::new(AzureBlobConfig::from_storage_config(
                &config.storage,
            ))?;
            info!(
                account = %config.storage.account,
                container = %config.storage.container,
                "Using Azure Blob Storage backend"
            );
            Arc::new(azure)
        }
        BackendKind::Memory => {
            info!("Using in-memory storage backend");
            Arc::new(MemoryBackend::default())
        }
    };

    let relay = UploadRelay::new(backend, config.storage.container.clone())
        .with_queue_depth(config.upload.queue_depth);

    let server = Server::bind(&config.server, relay).await?;
    info!(
        public_name = %config.server.public_name,
        service_id = %config.server.service_id,
        "Listening on http://{}:{}",
        config.server.hostname,
        server.local_addr().port()
    );

    server.run().await?;

    Ok(())
}
