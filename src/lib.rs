//! Azure Upload Relay Library
//!
//! HTTP service that streams multipart file uploads straight into Azure Blob
//! Storage and answers with the stored blob's URL.
//!
//! # Features
//!
//! - **Streaming**: the file is piped chunk by chunk, never buffered whole
//! - **Exactly-once outcome**: every upload resolves to one success or failure
//! - **Read-after-write**: the URL is only returned once the blob is visible
//! - **Pluggable storage**: Azure block blobs or an in-memory store
//!
//! # Example
//!
//! ```no_run
//! use azure_upload_relay::config::Config;
//! use azure_upload_relay::server::Server;
//! use azure_upload_relay::storage::{AzureBlobBackend, AzureBlobConfig};
//! use azure_upload_relay::upload::UploadRelay;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let backend = AzureBlobBackend::new(AzureBlobConfig::from_storage_config(&config.storage))?;
//!     let relay = UploadRelay::new(Arc::new(backend), config.storage.container.clone());
//!     let server = Server::bind(&config.server, relay).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod logging;
pub mod router;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;
pub use upload::{UploadError, UploadOutcome, UploadRelay, UploadRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
