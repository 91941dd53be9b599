use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::{Channel, PendingReply};
use crate::preview::response::PreviewResponse;

/// What the mock does with the next command it receives
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply immediately with this value
    Respond(Value),
    /// Fail the send itself
    SendError(String),
    /// Accept the command, then fail while waiting for the reply
    ReplyError(String),
    /// Accept the command and hold the reply until `release` is called
    Hold,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockReply>,
    fallback: Option<MockReply>,
    sent: Vec<Value>,
    held: VecDeque<oneshot::Sender<Result<Value>>>,
}

/// Scripted channel for tests. Replies are consumed in order; once the
/// script runs out the fallback (if any) answers every command.
#[derive(Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel that answers every command with `reply`
    pub fn always(reply: MockReply) -> Self {
        let channel = Self::new();
        channel.state.lock().unwrap().fallback = Some(reply);
        channel
    }

    pub fn push(&self, reply: MockReply) {
        self.state.lock().unwrap().script.push_back(reply);
    }

    /// Commands received so far
    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Answer the oldest held command. Returns false if nothing was held.
    pub fn release(&self, reply: Result<Value>) -> bool {
        let sender = self.state.lock().unwrap().held.pop_front();
        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn held(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }
}

/// `{ success: true, audio_data, content_type }`
pub fn success_reply(audio_data: &str, content_type: &str) -> Value {
    PreviewResponse::Success {
        audio_data_base64: audio_data.to_string(),
        content_type: content_type.to_string(),
    }
    .into_value()
}

/// `{ success: false, message }`
pub fn failure_reply(message: &str) -> Value {
    PreviewResponse::Failure {
        message: message.to_string(),
    }
    .into_value()
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&self, message: Value) -> Result<PendingReply> {
        let mut state = self.state.lock().unwrap();
        state.sent.push(message);

        let reply = match state.script.pop_front() {
            Some(reply) => reply,
            None => state
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("MockChannel has no scripted reply"))?,
        };

        match reply {
            MockReply::Respond(value) => Ok(PendingReply::ready(Ok(value))),
            MockReply::SendError(message) => Err(anyhow!(message)),
            MockReply::ReplyError(message) => Ok(PendingReply::ready(Err(anyhow!(message)))),
            MockReply::Hold => {
                let (tx, rx) = oneshot::channel();
                state.held.push_back(tx);
                Ok(PendingReply::new(rx))
            }
        }
    }
}
