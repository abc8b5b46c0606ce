//! Page → worker command channel.
//!
//! Pages post `SKIP_WAITING` and `CLEAR_CACHE` messages; the clear command
//! is answered with an acknowledgement over a one-shot reply channel.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::PartitionStore;
use crate::net::Network;

use super::registration::Registration;

/// Wire form of page messages, e.g. `{"type": "CLEAR_CACHE"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
  SkipWaiting,
  ClearCache,
}

/// Reply to a clear-cache command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearAck {
  pub success: bool,
  /// Number of partitions deleted
  pub removed: usize,
}

/// Command as delivered to the worker.
#[derive(Debug)]
pub enum Command {
  SkipWaiting,
  ClearCaches { reply: oneshot::Sender<ClearAck> },
}

/// Page-side handle for posting commands to the worker.
#[derive(Clone, Debug)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Command>,
}

impl WorkerHandle {
  /// Create a handle and the receiving end the worker serves.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  pub fn skip_waiting(&self) -> Result<()> {
    self
      .tx
      .send(Command::SkipWaiting)
      .map_err(|_| eyre!("Worker command channel closed"))
  }

  /// Ask the worker to delete every partition and wait for its reply.
  pub async fn clear_caches(&self) -> Result<ClearAck> {
    let (reply, ack) = oneshot::channel();
    self
      .tx
      .send(Command::ClearCaches { reply })
      .map_err(|_| eyre!("Worker command channel closed"))?;

    ack
      .await
      .map_err(|_| eyre!("Worker dropped the clear-cache request"))
  }

  /// Post a JSON message. Returns the acknowledgement for `CLEAR_CACHE`.
  pub async fn post_message(&self, json: &str) -> Result<Option<ClearAck>> {
    let message: Message =
      serde_json::from_str(json).map_err(|e| eyre!("Invalid worker message {}: {}", json, e))?;

    match message {
      Message::SkipWaiting => self.skip_waiting().map(|_| None),
      Message::ClearCache => self.clear_caches().await.map(Some),
    }
  }
}

/// Serve commands until every handle is dropped.
pub async fn serve<S: PartitionStore, N: Network>(
  registration: Arc<Registration<S, N>>,
  mut rx: mpsc::UnboundedReceiver<Command>,
) {
  while let Some(command) = rx.recv().await {
    match command {
      Command::SkipWaiting => match registration.skip_waiting() {
        Ok(Some(report)) => debug!(version = %report.version, "Skip-wait activated worker"),
        Ok(None) => debug!("Skip-wait with no waiting worker"),
        Err(e) => warn!("Skip-wait failed: {}", e),
      },
      Command::ClearCaches { reply } => {
        let ack = match registration.clear_caches() {
          Ok(removed) => ClearAck {
            success: true,
            removed,
          },
          Err(e) => {
            warn!("Clearing caches failed: {}", e);
            ClearAck {
              success: false,
              removed: 0,
            }
          }
        };
        // Requester may have given up waiting
        let _ = reply.send(ack);
      }
    }
  }
}

/// Start serving commands for `registration` on a background task.
pub fn spawn<S: PartitionStore, N: Network>(
  registration: Arc<Registration<S, N>>,
) -> (WorkerHandle, JoinHandle<()>) {
  let (handle, rx) = WorkerHandle::channel();
  let task = tokio::spawn(serve(registration, rx));
  (handle, task)
}
