//! Decoded preview audio, revocable references to it, and playback sinks

pub mod decode;
#[cfg(feature = "audio")]
pub mod device;
pub mod mock;
pub mod silent;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Decoded bytes of one preview plus the MIME type the backend reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }
}

/// Revocable reference to a clip registered in an `ObjectStore`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(String);

impl ObjectUrl {
    fn generate() -> Self {
        Self(format!("blob:ttspreview/{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectStoreStats {
    pub created: u64,
    pub revoked: u64,
    pub live: usize,
}

#[derive(Default)]
struct StoreInner {
    objects: HashMap<ObjectUrl, Arc<AudioClip>>,
    created: u64,
    revoked: u64,
}

/// Registry handing out revocable references to in-memory clips. A clip
/// stays reachable through its url until the url is revoked.
#[derive(Clone, Default)]
pub struct ObjectStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, clip: AudioClip) -> ObjectUrl {
        let url = ObjectUrl::generate();
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(url.clone(), Arc::new(clip));
        inner.created += 1;
        debug!(%url, live = inner.objects.len(), "Object url created");
        url
    }

    /// Resolve a url into something a sink can play
    pub fn open(&self, url: &ObjectUrl) -> Option<MediaSource> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(url).map(|clip| MediaSource {
            url: url.clone(),
            clip: clip.clone(),
        })
    }

    /// Invalidate a url. Returns false if it was not live.
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.objects.remove(url).is_none() {
            warn!(%url, "Revoking an object url that is not live");
            return false;
        }
        inner.revoked += 1;
        debug!(%url, live = inner.objects.len(), "Object url revoked");
        true
    }

    pub fn is_live(&self, url: &ObjectUrl) -> bool {
        self.inner.lock().unwrap().objects.contains_key(url)
    }

    pub fn stats(&self) -> ObjectStoreStats {
        let inner = self.inner.lock().unwrap();
        ObjectStoreStats {
            created: inner.created,
            revoked: inner.revoked,
            live: inner.objects.len(),
        }
    }
}

/// A clip opened through its url, ready to hand to a sink
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub url: ObjectUrl,
    pub clip: Arc<AudioClip>,
}

/// Why a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Completed,
    Stopped,
}

/// Handle to a started playback. `ended` fires once when playback stops
/// for any reason; `stop` cuts it short.
pub struct PlaybackHandle {
    ended: oneshot::Receiver<PlaybackEnd>,
    stop: Box<dyn FnOnce() + Send>,
}

impl PlaybackHandle {
    pub fn new(ended: oneshot::Receiver<PlaybackEnd>, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            ended,
            stop: Box::new(stop),
        }
    }

    pub fn into_parts(self) -> (oneshot::Receiver<PlaybackEnd>, Box<dyn FnOnce() + Send>) {
        (self.ended, self.stop)
    }
}

/// Something that can play a clip: an output device, a test double, or a
/// sink that only pretends to.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start playing. Errors mean playback never started.
    async fn play(&self, source: MediaSource) -> Result<PlaybackHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_is_single_use() {
        let store = ObjectStore::new();
        let url = store.create(AudioClip::new(vec![1, 2, 3], "audio/wav"));

        assert!(url.as_str().starts_with("blob:ttspreview/"));
        assert!(store.is_live(&url));
        assert_eq!(store.open(&url).unwrap().clip.bytes, vec![1, 2, 3]);

        assert!(store.revoke(&url));
        assert!(!store.revoke(&url));
        assert!(store.open(&url).is_none());
        assert_eq!(
            store.stats(),
            ObjectStoreStats {
                created: 1,
                revoked: 1,
                live: 0
            }
        );
    }
}
