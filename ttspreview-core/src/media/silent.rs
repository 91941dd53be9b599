//! A sink with no output device: validates the clip, then waits out its
//! duration as if it were playing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use super::decode::decode;
use super::{AudioSink, MediaSource, PlaybackEnd, PlaybackHandle};

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl SilentSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioSink for SilentSink {
    async fn play(&self, source: MediaSource) -> Result<PlaybackHandle> {
        let audio = decode(&source.clip)
            .with_context(|| format!("Cannot play {}", source.clip.content_type))?;
        let duration = audio.duration();
        debug!(url = %source.url, ?duration, "Silent playback started");

        let (ended_tx, ended_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let end = tokio::select! {
                _ = tokio::time::sleep(duration) => PlaybackEnd::Completed,
                _ = stop_rx => PlaybackEnd::Stopped,
            };
            let _ = ended_tx.send(end);
        });

        Ok(PlaybackHandle::new(ended_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}
