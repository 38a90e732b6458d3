//! Shared test infrastructure
//!
//! - Scriptable storage backend that records what the relay does to it
//! - Running server on an OS-assigned port
//! - Test data generation

#![allow(dead_code)]

use async_trait::async_trait;
use azure_upload_relay::config::ServerConfig;
use azure_upload_relay::server::Server;
use azure_upload_relay::storage::{BlobSink, SinkHandle, StorageBackend, StorageError};
use azure_upload_relay::upload::UploadRelay;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const CONTAINER: &str = "maana-azure-storage-wrapper";
pub const STORE_URL: &str = "https://store";

/// Ordered record of source reads and sink writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Read(usize),
    Write(usize),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Storage backend whose failures are scripted per test
pub struct FakeBackend {
    base_url: String,
    committed: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetches: AtomicUsize,
    fail_on_write: Option<usize>,
    hide_blobs: bool,
    events: Option<EventLog>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            base_url: STORE_URL.to_string(),
            committed: Arc::new(Mutex::new(HashMap::new())),
            fetches: AtomicUsize::new(0),
            fail_on_write: None,
            hide_blobs: false,
            events: None,
        }
    }

    /// Make the `n`th write (1-based) of every sink fail
    pub fn failing_on_write(mut self, n: usize) -> Self {
        self.fail_on_write = Some(n);
        self
    }

    /// Commit blobs but never report them as readable
    pub fn hiding_blobs(mut self) -> Self {
        self.hide_blobs = true;
        self
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.events = Some(log);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn committed(&self, name: &str) -> Option<Vec<u8>> {
        self.committed.lock().get(name).cloned()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }
}

struct FakeSink {
    name: String,
    buffer: Vec<u8>,
    writes: usize,
    fail_on_write: Option<usize>,
    committed: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    events: Option<EventLog>,
}

#[async_trait]
impl BlobSink for FakeSink {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.writes += 1;
        if let Some(log) = &self.events {
            log.lock().push(Event::Write(self.writes - 1));
        }
        if self.fail_on_write == Some(self.writes) {
            return Err(StorageError::Backend("quota exceeded".into()));
        }
        self.buffer.extend_from_slice(&chunk);
        // Give the reader a chance to run between writes
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        self.committed.lock().insert(self.name, self.buffer);
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    fn open_sink(&self, _container: &str, name: &str) -> SinkHandle {
        Box::new(FakeSink {
            name: name.to_string(),
            buffer: Vec::new(),
            writes: 0,
            fail_on_write: self.fail_on_write,
            committed: Arc::clone(&self.committed),
            events: self.events.clone(),
        })
    }

    async fn fetch_url(&self, container: &str, name: &str) -> Result<String, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.hide_blobs || !self.committed.lock().contains_key(name) {
            return Err(StorageError::not_found(container, name));
        }
        Ok(format!("{}/{}/{}", self.base_url, container, name))
    }
}

/// Source stream of `count` chunks of `size` bytes that logs each read
pub fn logged_source(
    count: usize,
    size: usize,
    log: EventLog,
) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send {
    use futures::StreamExt;
    futures::stream::iter(0..count).map(move |i| {
        log.lock().push(Event::Read(i));
        Ok(Bytes::from(vec![i as u8; size]))
    })
}

/// Generate a random test payload
pub fn random_payload(size: usize) -> Bytes {
    use rand::Rng;
    let mut rng = rand::rng();
    let data: Vec<u8> = (0..size).map(|_| rng.random()).collect();
    Bytes::from(data)
}

/// Server running on an OS-assigned port for the lifetime of the value
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(backend: Arc<dyn StorageBackend>) -> Self {
        Self::start_with(backend, ServerConfig {
            address: "127.0.0.1:0".into(),
            ..Default::default()
        })
        .await
    }

    pub async fn start_with(backend: Arc<dyn StorageBackend>, config: ServerConfig) -> Self {
        let relay = UploadRelay::new(backend, CONTAINER);
        let server = Server::bind(&config, relay).await.unwrap();
        let addr = server.local_addr();

        let handle = tokio::spawn(async move {
            let _ = server.run_until(std::future::pending()).await;
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST a single file part to /upload
    pub async fn upload(&self, file_name: &str, data: Bytes) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
