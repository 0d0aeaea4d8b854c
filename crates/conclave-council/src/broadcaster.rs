//! The transcript's single writer. Reactors and the host adapter hold
//! send-only [`Publisher`] handles onto a bounded submission channel; one
//! drain task pulls in FIFO order and appends, so the transcript's line
//! order is exactly the submission order.

use std::time::Duration;

use conclave_core::config::OverflowPolicy;
use conclave_core::types::Message;
use conclave_transcript::{TranscriptError, TranscriptWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Drop-newest policy and the channel is full. The caller logs and
    /// discards the message.
    #[error("broadcast channel full")]
    ChannelFull,

    /// The drain task is gone (shutdown or fatal write error).
    #[error("broadcaster closed")]
    Closed,
}

/// Send-only handle onto the broadcaster's submission channel.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<Message>,
    policy: OverflowPolicy,
}

impl Publisher {
    /// Submit a message for appending.
    ///
    /// Under the default *block* policy a full channel applies
    /// backpressure: the call waits for space. Under *drop-newest* it
    /// returns [`PublishError::ChannelFull`] immediately.
    pub async fn publish(&self, msg: Message) -> Result<(), PublishError> {
        match self.policy {
            OverflowPolicy::Block => self.tx.send(msg).await.map_err(|_| PublishError::Closed),
            OverflowPolicy::DropNewest => self.tx.try_send(msg).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::ChannelFull,
                mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
            }),
        }
    }
}

/// Create the bounded submission channel.
pub fn channel(capacity: usize, policy: OverflowPolicy) -> (Publisher, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Publisher { tx, policy }, rx)
}

pub struct Broadcaster {
    writer: TranscriptWriter,
    rx: mpsc::Receiver<Message>,
    drain_timeout: Duration,
    cancel: CancellationToken,
}

impl Broadcaster {
    pub fn new(
        writer: TranscriptWriter,
        rx: mpsc::Receiver<Message>,
        drain_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            writer,
            rx,
            drain_timeout,
            cancel,
        }
    }

    /// Pull submissions in FIFO order and append until cancelled or every
    /// publisher is gone, then drain what was already accepted (bounded
    /// by `drain_timeout`).
    ///
    /// An append failure (disk full, permission lost) means accepted
    /// records can no longer be made durable: it cancels the top-level
    /// token and returns the error, which the orchestrator turns into
    /// process exit.
    pub async fn run(mut self) -> Result<(), TranscriptError> {
        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(msg) => self.append(&msg)?,
                    None => return Ok(()),
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        let deadline = Instant::now() + self.drain_timeout;
        loop {
            if Instant::now() >= deadline {
                warn!("broadcaster drain deadline hit; remaining submissions dropped");
                break;
            }
            match self.rx.try_recv() {
                Ok(msg) => self.append(&msg)?,
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn append(&mut self, msg: &Message) -> Result<(), TranscriptError> {
        if let Err(e) = self.writer.append(msg) {
            error!(error = %e, "transcript append failed; shutting down");
            self.cancel.cancel();
            return Err(e);
        }
        debug!(id = %msg.id, from = %msg.from, "appended transcript record");
        Ok(())
    }
}

/// Convenience wiring: channel + drain task in one call.
pub fn spawn_broadcaster(
    writer: TranscriptWriter,
    capacity: usize,
    policy: OverflowPolicy,
    drain_timeout: Duration,
    cancel: CancellationToken,
) -> (Publisher, JoinHandle<Result<(), TranscriptError>>) {
    let (publisher, rx) = channel(capacity, policy);
    let broadcaster = Broadcaster::new(writer, rx, drain_timeout, cancel);
    (publisher, tokio::spawn(broadcaster.run()))
}
