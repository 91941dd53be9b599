//! Bidirectional command channel between the preview session and a backend

pub mod direct;
pub mod hass;
pub mod mock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

/// A persistent connection that carries JSON commands to a backend and
/// returns exactly one correlated reply per command.
///
/// Sending and awaiting the reply are separate steps so callers can tell a
/// command that never left from one whose answer never arrived.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a command. Resolves once the command is on the wire.
    async fn send(&self, message: Value) -> Result<PendingReply>;
}

/// The not-yet-arrived reply to a command
pub struct PendingReply {
    receiver: oneshot::Receiver<Result<Value>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl PendingReply {
    pub fn new(receiver: oneshot::Receiver<Result<Value>>) -> Self {
        Self {
            receiver,
            on_drop: None,
        }
    }

    /// A reply that is already known
    pub fn ready(reply: Result<Value>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(reply);
        Self::new(rx)
    }

    /// Run `cleanup` once the reply is received or abandoned. Channels use
    /// this to forget commands nobody is waiting for any more.
    pub fn on_drop(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.on_drop = Some(Box::new(cleanup));
        self
    }

    pub async fn recv(mut self) -> Result<Value> {
        (&mut self.receiver)
            .await
            .context("Channel closed before a reply arrived")?
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(cleanup) = self.on_drop.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_runs_once_whether_received_or_abandoned() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let reply = PendingReply::ready(Ok(json!({"ok": true}))).on_drop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(reply.recv().await.unwrap(), json!({"ok": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (_tx, rx) = oneshot::channel();
        let counter = calls.clone();
        drop(PendingReply::new(rx).on_drop(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
