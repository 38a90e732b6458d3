//! Upload relay
//!
//! Pipes a source stream into a blob sink and resolves the upload once the
//! store has confirmed it.
//!
//! # Pipeline
//!
//! ```text
//! source ──► reader ──(bounded queue)──► writer ──► BlobSink
//!               │                          │
//!               └──── TerminalSignal ◄─────┘   first event wins
//!                           │
//!                           ▼
//!             Finished ─► fetch_url ─► Success { url }
//!             Failed   ─────────────► Failure { cause }
//! ```
//!
//! The reader and writer run concurrently on the caller's task. The queue
//! bounds how many chunks can sit between them, so memory stays proportional
//! to the chunk size rather than the file size.
//!
//! # Example
//!
//! ```no_run
//! use azure_upload_relay::storage::MemoryBackend;
//! use azure_upload_relay::upload::{UploadRelay, UploadOutcome};
//! use bytes::Bytes;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let relay = UploadRelay::new(Arc::new(MemoryBackend::default()), "uploads");
//! match relay.relay_buffered(Bytes::from("hello"), "hello.txt").await {
//!     UploadOutcome::Success { url } => println!("stored at {}", url),
//!     UploadOutcome::Failure { cause } => eprintln!("upload failed: {}", cause),
//! }
//! # }
//! ```

use super::completion::{terminal, TerminalEvent, TerminalSignal};
use super::progress::{ProgressStream, TransferProgress};
use super::{BoxError, UploadError, UploadOutcome, UploadRequest};
use crate::storage::{SinkHandle, StorageBackend};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Chunk size used when re-streaming an already-buffered payload
pub const BUFFERED_CHUNK_SIZE: usize = 2048;

/// Default number of chunks queued between reader and writer
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

enum Frame {
    Data(Bytes),
    End,
}

/// Streams uploads into one container of a storage backend
///
/// Constructed once at start-up and shared; it holds no per-upload state.
#[derive(Clone)]
pub struct UploadRelay {
    backend: Arc<dyn StorageBackend>,
    container: String,
    queue_depth: usize,
}

impl UploadRelay {
    pub fn new(backend: Arc<dyn StorageBackend>, container: impl Into<String>) -> Self {
        Self {
            backend,
            container: container.into(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Set how many chunks may be in flight between source and sink
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Relay one upload
    ///
    /// Resolves exactly once: `Failure` as soon as either end of the pipe
    /// fails (no metadata fetch), otherwise one metadata fetch after the sink
    /// commits, yielding `Success` with the blob's URL or `Failure` if that
    /// lookup fails.
    #[tracing::instrument(
        name = "upload.relay",
        skip(self, request),
        fields(
            storage.container = %self.container,
            upload.blob = %request.destination_name(),
            upload.bytes = tracing::field::Empty,
            upload.chunks = tracing::field::Empty,
            upload.url = tracing::field::Empty
        )
    )]
    pub async fn relay<S, E>(&self, request: UploadRequest<S>) -> UploadOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<BoxError> + Send,
    {
        let (source, name) = request.into_parts();
        if name.is_empty() {
            tracing::warn!("Rejecting upload with empty destination name");
            return UploadOutcome::Failure {
                cause: UploadError::InvalidDestination(name),
            };
        }

        let start_time = Instant::now();
        let progress = Arc::new(TransferProgress::default());
        let source = ProgressStream::new(source, Arc::clone(&progress));
        let sink = self.backend.open_sink(&self.container, &name);

        let (signal, mut receiver) = terminal();
        let (tx, rx) = mpsc::channel(self.queue_depth);

        let pipe = async {
            tokio::join!(read_source(source, tx, &signal), write_sink(sink, rx, &signal));
        };
        tokio::pin!(pipe);

        let event = tokio::select! {
            biased;
            event = receiver.wait() => event,
            _ = &mut pipe => receiver.take(),
        };

        let span = tracing::Span::current();
        span.record("upload.bytes", progress.bytes());
        span.record("upload.chunks", progress.chunks());

        let outcome = match event {
            TerminalEvent::Failed(cause) => UploadOutcome::Failure { cause },
            TerminalEvent::Finished { bytes } => {
                tracing::debug!(bytes, "Sink committed, fetching blob metadata");
                match self.backend.fetch_url(&self.container, &name).await {
                    Ok(url) => UploadOutcome::Success { url },
                    Err(e) => UploadOutcome::Failure {
                        cause: UploadError::MetadataFetch(e),
                    },
                }
            }
        };

        let duration = start_time.elapsed();
        match &outcome {
            UploadOutcome::Success { url } => {
                span.record("upload.url", url.as_str());
                tracing::info!(
                    url = %url,
                    bytes = progress.bytes(),
                    largest_chunk = progress.largest_chunk(),
                    duration_ms = duration.as_millis(),
                    "Upload completed"
                );
            }
            UploadOutcome::Failure { cause } => {
                tracing::error!(
                    error = %cause,
                    bytes = progress.bytes(),
                    duration_ms = duration.as_millis(),
                    "Upload failed"
                );
            }
        }

        outcome
    }

    /// Relay a payload that is already fully in memory
    ///
    /// The payload is re-chunked into [`BUFFERED_CHUNK_SIZE`] pieces and goes
    /// through the same pipeline as a streamed upload.
    pub async fn relay_buffered(&self, data: Bytes, name: impl Into<String>) -> UploadOutcome {
        self.relay(UploadRequest::new(
            chunked(data, BUFFERED_CHUNK_SIZE),
            name,
        ))
        .await
    }
}

/// Split a buffer into a stream of fixed-size chunks
pub fn chunked(
    data: Bytes,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    let chunk_size = chunk_size.max(1);
    let mut remaining = data;
    futures::stream::iter(std::iter::from_fn(move || {
        if remaining.is_empty() {
            None
        } else {
            let n = chunk_size.min(remaining.len());
            Some(Ok(remaining.split_to(n)))
        }
    }))
}

async fn read_source<S, E>(source: ProgressStream<S>, tx: mpsc::Sender<Frame>, signal: &TerminalSignal)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    futures::pin_mut!(source);
    loop {
        let chunk = match source.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                signal.fire(TerminalEvent::Failed(UploadError::SourceStream(e.into())));
                return;
            }
            None => {
                // Writer may already have failed and hung up
                let _ = tx.send(Frame::End).await;
                return;
            }
        };

        if chunk.is_empty() {
            continue;
        }
        if tx.send(Frame::Data(chunk)).await.is_err() {
            return;
        }
    }
}

async fn write_sink(mut sink: SinkHandle, mut rx: mpsc::Receiver<Frame>, signal: &TerminalSignal) {
    let mut written: u64 = 0;
    while let Some(frame) = rx.recv().await {
        match frame {
            Frame::Data(chunk) => {
                let len = chunk.len() as u64;
                if let Err(e) = sink.write(chunk).await {
                    signal.fire(TerminalEvent::Failed(UploadError::SinkWrite(e)));
                    return;
                }
                written += len;
            }
            Frame::End => {
                let event = match sink.finish().await {
                    Ok(()) => TerminalEvent::Finished { bytes: written },
                    Err(e) => TerminalEvent::Failed(UploadError::SinkWrite(e)),
                };
                signal.fire(event);
                return;
            }
        }
    }
    // Queue closed without End: the reader has already reported its failure
}
