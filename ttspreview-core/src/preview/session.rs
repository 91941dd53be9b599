use anyhow::{anyhow, Context};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{DecodeError, PreviewError};
use super::request::PreviewRequest;
use super::response::PreviewResponse;
use crate::channel::Channel;
use crate::media::{AudioClip, AudioSink, MediaSource, ObjectStore, ObjectUrl, PlaybackEnd};

/// Standard alphabet, padding optional, like a browser's `atob`
const AUDIO_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    AwaitingResponse,
    Decoding,
    /// A preview is audible. New previews are accepted and supersede it.
    Playing,
}

impl SessionState {
    /// True while a request is between send and playback start
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SessionState::Sending | SessionState::AwaitingResponse | SessionState::Decoding
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Upper bound on send + reply. `None` relies on the channel's own
    /// failure signalling.
    pub response_timeout: Option<Duration>,
}

/// What `preview` returns once playback has begun
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewStarted {
    pub resource_id: Uuid,
    pub url: ObjectUrl,
    pub content_type: String,
    pub bytes: usize,
}

/// The one live preview: its reference and a way to stop it
struct AudioResource {
    id: Uuid,
    url: ObjectUrl,
    stop: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct Slot {
    in_flight: bool,
    current: Option<AudioResource>,
}

impl Slot {
    fn resting_state(&self) -> SessionState {
        if self.current.is_some() {
            SessionState::Playing
        } else {
            SessionState::Idle
        }
    }
}

struct Shared {
    slot: Mutex<Slot>,
    objects: ObjectStore,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn publish(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Stop and revoke whatever is playing. Returns false if nothing was.
    fn release_current(&self, reason: &str) -> bool {
        let taken = {
            let mut slot = self.slot.lock().unwrap();
            let taken = slot.current.take();
            if !slot.in_flight {
                self.publish(slot.resting_state());
            }
            taken
        };

        let Some(resource) = taken else {
            return false;
        };
        (resource.stop)();
        self.objects.revoke(&resource.url);
        info!(id = %resource.id, url = %resource.url, reason, "Preview audio released");
        true
    }

    /// Completion continuation for one playback. Only cleans up if the
    /// slot still holds that playback; superseded ones were released already.
    fn playback_ended(&self, id: Uuid, end: PlaybackEnd) {
        let taken = {
            let mut slot = self.slot.lock().unwrap();
            if slot.current.as_ref().map(|r| r.id) != Some(id) {
                debug!(%id, ?end, "Ended playback was already released");
                return;
            }
            let taken = slot.current.take();
            if !slot.in_flight {
                self.publish(slot.resting_state());
            }
            taken
        };

        if let Some(resource) = taken {
            self.objects.revoke(&resource.url);
            info!(id = %resource.id, ?end, "Preview playback finished");
        }
    }
}

/// Marks a request as in flight; dropping it returns the session to rest,
/// including when the `preview` future is dropped midway.
struct InFlight<'a> {
    shared: &'a Shared,
}

impl InFlight<'_> {
    fn advance(&self, state: SessionState) {
        self.shared.publish(state);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock().unwrap();
        slot.in_flight = false;
        self.shared.publish(slot.resting_state());
    }
}

/// A url created for a playback that has not started yet. Revoked on drop
/// unless claimed, so a failed or abandoned start never leaks it.
struct UnclaimedUrl<'a> {
    objects: &'a ObjectStore,
    url: ObjectUrl,
    claimed: bool,
}

impl UnclaimedUrl<'_> {
    fn open(&self) -> Option<MediaSource> {
        self.objects.open(&self.url)
    }

    fn claim(mut self) -> ObjectUrl {
        self.claimed = true;
        self.url.clone()
    }
}

impl Drop for UnclaimedUrl<'_> {
    fn drop(&mut self) {
        if !self.claimed {
            self.objects.revoke(&self.url);
        }
    }
}

/// Runs preview requests over a channel and owns the resulting playback.
///
/// At most one request is in flight and at most one preview is audible.
/// A new preview may start while an earlier one is still playing; the
/// earlier one is stopped and its reference revoked before the new one
/// starts.
pub struct PreviewSession {
    channel: Arc<dyn Channel>,
    sink: Arc<dyn AudioSink>,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl PreviewSession {
    pub fn new(channel: Arc<dyn Channel>, sink: Arc<dyn AudioSink>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            channel,
            sink,
            config,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                objects: ObjectStore::new(),
                state,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// References handed out by this session
    pub fn objects(&self) -> &ObjectStore {
        &self.shared.objects
    }

    /// Url of the preview currently playing, if any
    pub fn current(&self) -> Option<ObjectUrl> {
        let slot = self.shared.slot.lock().unwrap();
        slot.current.as_ref().map(|r| r.url.clone())
    }

    /// Stop any playing preview and revoke its reference
    pub fn teardown(&self) {
        self.shared.release_current("teardown");
    }

    /// Send one preview request and start playing the reply. Resolves once
    /// playback has started; completion is observable through `subscribe`.
    pub async fn preview(&self, request: PreviewRequest) -> Result<PreviewStarted, PreviewError> {
        let result = match request.validate().and_then(|_| self.begin()) {
            Ok(guard) => self.run(request, &guard).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(started) => info!(
                id = %started.resource_id,
                content_type = %started.content_type,
                bytes = started.bytes,
                "Audio preview playing"
            ),
            Err(e) => warn!(kind = e.kind(), "Preview failed: {e}"),
        }
        result
    }

    fn begin(&self) -> Result<InFlight<'_>, PreviewError> {
        let mut slot = self.shared.slot.lock().unwrap();
        if slot.in_flight {
            return Err(PreviewError::Busy);
        }
        slot.in_flight = true;
        self.shared.publish(SessionState::Sending);
        Ok(InFlight {
            shared: &self.shared,
        })
    }

    async fn run(
        &self,
        request: PreviewRequest,
        guard: &InFlight<'_>,
    ) -> Result<PreviewStarted, PreviewError> {
        debug!(
            base_url = %request.base_url,
            model = %request.model,
            persona = %request.persona,
            format = %request.format,
            "Sending preview request"
        );
        let command = request
            .to_command()
            .map_err(|e| PreviewError::validation(format!("request cannot be encoded: {e}")))?;
        drop(request);

        let reply = self
            .exchange(command, guard)
            .await
            .map_err(PreviewError::Transport)?;

        let (audio_data, content_type) = match PreviewResponse::from_value(reply)? {
            PreviewResponse::Failure { message } => return Err(PreviewError::Synthesis(message)),
            PreviewResponse::Success {
                audio_data_base64,
                content_type,
            } => (audio_data_base64, content_type),
        };

        guard.advance(SessionState::Decoding);
        let bytes = decode_audio(&audio_data)?;
        let byte_len = bytes.len();

        let unclaimed = UnclaimedUrl {
            objects: &self.shared.objects,
            url: self
                .shared
                .objects
                .create(AudioClip::new(bytes, content_type.clone())),
            claimed: false,
        };
        self.shared.release_current("superseded");

        let source = unclaimed.open().ok_or_else(|| {
            PreviewError::Playback(anyhow!("object url was revoked before playback"))
        })?;
        let handle = self
            .sink
            .play(source)
            .await
            .map_err(PreviewError::Playback)?;

        let url = unclaimed.claim();
        let (ended, stop) = handle.into_parts();
        let id = Uuid::new_v4();
        {
            let mut slot = self.shared.slot.lock().unwrap();
            slot.current = Some(AudioResource {
                id,
                url: url.clone(),
                stop,
            });
            self.shared.publish(SessionState::Playing);
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            // A dropped sender means the sink gave up on the playback
            let end = ended.await.unwrap_or(PlaybackEnd::Stopped);
            shared.playback_ended(id, end);
        });

        Ok(PreviewStarted {
            resource_id: id,
            url,
            content_type,
            bytes: byte_len,
        })
    }

    async fn exchange(&self, command: Value, guard: &InFlight<'_>) -> anyhow::Result<Value> {
        let round_trip = async {
            let pending = self
                .channel
                .send(command)
                .await
                .context("Failed to send preview request")?;
            guard.advance(SessionState::AwaitingResponse);
            pending.recv().await
        };

        match self.config.response_timeout {
            Some(limit) => tokio::time::timeout(limit, round_trip)
                .await
                .map_err(|_| anyhow!("No response within {limit:?}"))?,
            None => round_trip.await,
        }
    }
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.shared.release_current("session dropped");
    }
}

fn decode_audio(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = AUDIO_BASE64.decode(compact)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(bytes)
}
