//! One-shot terminal signal for an upload
//!
//! Both halves of the pipe (source reader and sink writer) can observe the
//! end of a transfer: a read error, a write error, or a committed blob. The
//! first event fired through [`TerminalSignal`] is delivered to the
//! [`TerminalReceiver`]; every later event is dropped. This is what makes an
//! upload resolve exactly once no matter how the events interleave.

use super::UploadError;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// How the byte transfer ended
#[derive(Debug)]
pub enum TerminalEvent {
    /// The sink committed every byte
    Finished { bytes: u64 },
    /// Either end of the pipe failed
    Failed(UploadError),
}

/// Sending half; cheap to share by reference between the pipe halves
#[derive(Debug)]
pub struct TerminalSignal {
    tx: Mutex<Option<oneshot::Sender<TerminalEvent>>>,
}

/// Receiving half
#[derive(Debug)]
pub struct TerminalReceiver {
    rx: oneshot::Receiver<TerminalEvent>,
}

/// Create a connected signal/receiver pair
pub fn terminal() -> (TerminalSignal, TerminalReceiver) {
    let (tx, rx) = oneshot::channel();
    (
        TerminalSignal {
            tx: Mutex::new(Some(tx)),
        },
        TerminalReceiver { rx },
    )
}

impl TerminalSignal {
    /// Fire a terminal event
    ///
    /// Returns `true` if this call won, `false` if an earlier event already
    /// settled the upload.
    pub fn fire(&self, event: TerminalEvent) -> bool {
        let tx = self.tx.lock().take();
        match tx {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!("Terminal receiver dropped before the event arrived");
                }
                true
            }
            None => {
                tracing::debug!(event = ?event, "Ignoring terminal event, upload already settled");
                false
            }
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl TerminalReceiver {
    /// Wait for the winning event
    ///
    /// If the signal is dropped without firing the upload resolves as
    /// [`UploadError::Interrupted`] rather than hanging.
    pub async fn wait(&mut self) -> TerminalEvent {
        match (&mut self.rx).await {
            Ok(event) => event,
            Err(_) => TerminalEvent::Failed(UploadError::Interrupted),
        }
    }

    /// Take the event without waiting, once both pipe halves have returned
    pub fn take(&mut self) -> TerminalEvent {
        self.rx
            .try_recv()
            .unwrap_or_else(|_| TerminalEvent::Failed(UploadError::Interrupted))
    }
}
