//! The single-listener change channel.
//!
//! Every producer holds a clone of the same [`ChangeListener`]; the
//! orchestrator owns the one [`ChangeStream`] and drains it from a single
//! task. Events are therefore handled one at a time in arrival order, and a
//! producer awaiting [`ChangeListener::notify`] resumes only once its own
//! event has been fully handled.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::change::{ChangeError, RuntimeChangeEvent};

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Runtime change listener is not running")]
    Closed,

    #[error("Runtime change was dropped before it was handled")]
    Dropped,

    #[error(transparent)]
    Change(#[from] ChangeError),
}

/// An event queued for the dispatcher, with an optional reply slot.
#[derive(Debug)]
pub struct ChangeEnvelope {
    pub event: RuntimeChangeEvent,
    reply: Option<oneshot::Sender<Option<Value>>>,
}

impl ChangeEnvelope {
    /// Hand the handler's result back to the producer, if it is waiting.
    pub fn respond(self, result: Option<Value>) {
        if let Some(reply) = self.reply {
            // The producer may have given up waiting; that is fine.
            let _ = reply.send(result);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeListener {
    tx: mpsc::Sender<ChangeEnvelope>,
}

impl ChangeListener {
    /// Queue `event` and wait for the dispatcher's result.
    pub async fn notify(&self, event: RuntimeChangeEvent) -> Result<Option<Value>, ListenerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ChangeEnvelope {
                event,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ListenerError::Closed)?;
        rx.await.map_err(|_| ListenerError::Dropped)
    }

    /// Parse a raw `{"req", "res"}` payload and [`notify`](Self::notify).
    pub async fn notify_value(&self, payload: Value) -> Result<Option<Value>, ListenerError> {
        let event = RuntimeChangeEvent::from_value(payload)?;
        self.notify(event).await
    }

    /// Queue `event` without waiting for it to be handled.
    pub async fn submit(&self, event: RuntimeChangeEvent) -> Result<(), ListenerError> {
        self.tx
            .send(ChangeEnvelope { event, reply: None })
            .await
            .map_err(|_| ListenerError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half, owned by the dispatcher task.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<ChangeEnvelope>,
}

impl ChangeStream {
    /// Next queued event; `None` once every listener is dropped.
    pub async fn next(&mut self) -> Option<ChangeEnvelope> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

pub fn channel(capacity: usize) -> (ChangeListener, ChangeStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChangeListener { tx }, ChangeStream { rx })
}
