use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use super::{AudioSink, MediaSource, ObjectUrl, PlaybackEnd, PlaybackHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Played(ObjectUrl),
    Stopped(ObjectUrl),
    Completed(ObjectUrl),
}

#[derive(Default)]
struct SinkState {
    failures: VecDeque<String>,
    events: Vec<SinkEvent>,
    playing: HashMap<ObjectUrl, oneshot::Sender<PlaybackEnd>>,
}

/// Sink for tests. Playback runs until the test calls `complete` or the
/// session stops it; every transition is recorded.
#[derive(Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `play` fail to start
    pub fn fail_next(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push_back(message.to_string());
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn playing(&self) -> Vec<ObjectUrl> {
        self.state.lock().unwrap().playing.keys().cloned().collect()
    }

    /// Finish a playback naturally. Returns false if it was not playing.
    pub fn complete(&self, url: &ObjectUrl) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(ended) = state.playing.remove(url) else {
            return false;
        };
        state.events.push(SinkEvent::Completed(url.clone()));
        let _ = ended.send(PlaybackEnd::Completed);
        true
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, source: MediaSource) -> Result<PlaybackHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.failures.pop_front() {
            return Err(anyhow!(message));
        }

        let (ended_tx, ended_rx) = oneshot::channel();
        state.playing.insert(source.url.clone(), ended_tx);
        state.events.push(SinkEvent::Played(source.url.clone()));

        let shared = self.state.clone();
        let url = source.url;
        Ok(PlaybackHandle::new(ended_rx, move || {
            let mut state = shared.lock().unwrap();
            if let Some(ended) = state.playing.remove(&url) {
                state.events.push(SinkEvent::Stopped(url));
                let _ = ended.send(PlaybackEnd::Stopped);
            }
        }))
    }
}
