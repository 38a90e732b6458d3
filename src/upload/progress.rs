//! Transfer progress
//!
//! [`ProgressStream`] wraps the source stream and counts what passes through
//! it, emitting a trace event per chunk.

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Counters shared between the stream and whoever reports on it
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes: AtomicU64,
    chunks: AtomicU64,
    largest_chunk: AtomicUsize,
}

impl TransferProgress {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks.load(Ordering::Relaxed)
    }

    pub fn largest_chunk(&self) -> usize {
        self.largest_chunk.load(Ordering::Relaxed)
    }

    fn record(&self, len: usize) -> u64 {
        self.largest_chunk.fetch_max(len, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pin_project! {
    /// Source stream wrapper that records each chunk it yields
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        progress: Arc<TransferProgress>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, progress: Arc<TransferProgress>) -> Self {
        Self { inner, progress }
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let polled = this.inner.poll_next(cx);
        if let Poll::Ready(Some(Ok(ref chunk))) = polled {
            let seq = this.progress.record(chunk.len());
            tracing::trace!(chunk = seq, len = chunk.len(), "Chunk received");
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
