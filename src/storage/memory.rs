//! In-memory blob store
//!
//! Objects live in a [`DashMap`] keyed by `(container, name)`. A sink buffers
//! its object and publishes it on `finish`, so a blob is never visible
//! half-written. Concurrent writers to the same name race; whichever finishes
//! last wins.

use super::{BlobSink, SinkHandle, StorageBackend, StorageError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;

type ObjectMap = DashMap<(String, String), Bytes>;

/// In-process storage backend
#[derive(Clone)]
pub struct MemoryBackend {
    base_url: String,
    objects: Arc<ObjectMap>,
}

impl MemoryBackend {
    /// Create a backend whose URLs are rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Arc::new(DashMap::new()),
        }
    }

    /// Contents of a committed blob
    pub fn get(&self, container: &str, name: &str) -> Option<Bytes> {
        self.objects
            .get(&(container.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Number of committed blobs across all containers
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn url_for(&self, container: &str, name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            container,
            super::azure::encode_blob_name(name)
        )
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

struct MemorySink {
    key: (String, String),
    buffer: BytesMut,
    objects: Arc<ObjectMap>,
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let MemorySink {
            key,
            buffer,
            objects,
        } = *self;
        tracing::debug!(
            container = %key.0,
            blob = %key.1,
            bytes = buffer.len(),
            "Committed in-memory blob"
        );
        objects.insert(key, buffer.freeze());
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn open_sink(&self, container: &str, name: &str) -> SinkHandle {
        Box::new(MemorySink {
            key: (container.to_string(), name.to_string()),
            buffer: BytesMut::new(),
            objects: Arc::clone(&self.objects),
        })
    }

    async fn fetch_url(&self, container: &str, name: &str) -> Result<String, StorageError> {
        if self
            .objects
            .contains_key(&(container.to_string(), name.to_string()))
        {
            Ok(self.url_for(container, name))
        } else {
            Err(StorageError::not_found(container, name))
        }
    }
}
