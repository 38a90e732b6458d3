//! Blob storage adapter
//!
//! The relay only ever needs two things from a blob store: somewhere to write
//! the bytes of one object, and the public URL of that object once it has been
//! written. [`StorageBackend`] is that capability; [`BlobSink`] is the
//! write-only destination it hands out.
//!
//! # Implementations
//!
//! - [`azure::AzureBlobBackend`] - Azure Blob Storage over its REST API
//! - [`memory::MemoryBackend`] - in-process map, for tests and local runs

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod azure;
pub mod memory;

pub use azure::{AzureBlobBackend, AzureBlobConfig};
pub use memory::MemoryBackend;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The object is not (yet) visible to a read
    #[error("Blob not found: {container}/{name}")]
    NotFound { container: String, name: String },

    /// Transport, auth, quota or any other backend-side failure
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    pub fn not_found(container: &str, name: &str) -> Self {
        Self::NotFound {
            container: container.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Write-only destination for a single blob
///
/// A sink is owned by exactly one upload. Bytes become visible only after
/// [`BlobSink::finish`] returns `Ok`.
#[async_trait]
pub trait BlobSink: Send {
    /// Append a chunk to the blob
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    /// Flush anything buffered and commit the blob
    async fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

/// Opaque handle to an open sink
pub type SinkHandle = Box<dyn BlobSink>;

/// Blob storage capability used by the upload relay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open a write destination for `name` in `container`
    ///
    /// Never fails up front: rejections (auth, quota, invalid names) surface
    /// from the sink's `write` or `finish`.
    fn open_sink(&self, container: &str, name: &str) -> SinkHandle;

    /// Look up a written blob and return its durable URL
    async fn fetch_url(&self, container: &str, name: &str) -> Result<String, StorageError>;
}
