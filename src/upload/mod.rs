//! Upload module
//!
//! Streams an inbound file into blob storage and reports exactly one
//! [`UploadOutcome`] per [`UploadRequest`].

use crate::storage::StorageError;
use thiserror::Error;

pub mod completion;
pub mod progress;
pub mod relay;

pub use relay::{UploadRelay, BUFFERED_CHUNK_SIZE};

/// Boxed error from an arbitrary source stream
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upload errors
///
/// Every variant is terminal for the upload it came from. Nothing is retried
/// and partially written blobs are left as they are.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid destination name: {0:?}")]
    InvalidDestination(String),

    /// Reading the inbound stream failed (client disconnect, bad multipart body)
    #[error("Source stream error: {0}")]
    SourceStream(#[source] BoxError),

    /// Writing or committing the blob failed
    #[error("Sink write error: {0}")]
    SinkWrite(#[source] StorageError),

    /// Bytes were committed but the blob's URL could not be looked up
    #[error("Metadata fetch error: {0}")]
    MetadataFetch(#[source] StorageError),

    #[error("Upload ended without completing or failing")]
    Interrupted,
}

impl UploadError {
    /// True when the caller, not the backend, is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidDestination(_) | Self::SourceStream(_))
    }
}

/// Result of a single upload
#[derive(Debug)]
pub enum UploadOutcome {
    Success { url: String },
    Failure { cause: UploadError },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Success { url } => Some(url),
            Self::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<String, UploadError> {
        match self {
            Self::Success { url } => Ok(url),
            Self::Failure { cause } => Err(cause),
        }
    }
}

impl From<Result<String, UploadError>> for UploadOutcome {
    fn from(result: Result<String, UploadError>) -> Self {
        match result {
            Ok(url) => Self::Success { url },
            Err(cause) => Self::Failure { cause },
        }
    }
}

/// A single-pass byte stream plus the blob name it should be stored under
///
/// The name is used as-is; backend naming rules surface as failures.
pub struct UploadRequest<S> {
    source: S,
    destination_name: String,
}

impl<S> UploadRequest<S> {
    pub fn new(source: S, destination_name: impl Into<String>) -> Self {
        Self {
            source,
            destination_name: destination_name.into(),
        }
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub(crate) fn into_parts(self) -> (S, String) {
        (self.source, self.destination_name)
    }
}
