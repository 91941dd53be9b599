use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::preview::{FormData, SessionConfig};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Home Assistant websocket API
    #[default]
    Hass,
    /// Call the speech endpoint from this process
    Direct,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackBackend {
    /// Default output device (requires the `audio` feature)
    #[default]
    Device,
    /// Decode and time the clip without producing sound
    Silent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "default_hass_url")]
    pub hass_url: String,

    #[serde(default)]
    pub access_token: String,

    /// HTTP timeout for the direct transport
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            hass_url: default_hass_url(),
            access_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Values pre-filled into the preview form. Anything unset falls back to
/// the request builder's defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewDefaults {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub persona: Option<String>,

    #[serde(default)]
    pub preview_text: Option<String>,

    #[serde(default)]
    pub speed: Option<f64>,

    #[serde(default)]
    pub format: Option<String>,

    #[serde(default)]
    pub sample_rate: Option<u32>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Bound on waiting for the backend's reply; unset waits for the
    /// transport to give up
    #[serde(default)]
    pub response_timeout_secs: Option<u64>,
}

impl Default for PreviewDefaults {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            persona: None,
            preview_text: None,
            speed: None,
            format: None,
            sample_rate: None,
            api_key: None,
            response_timeout_secs: None,
        }
    }
}

impl PreviewDefaults {
    /// The stored values as form fields
    pub fn to_form(&self) -> FormData {
        let mut form = FormData::new();
        let mut set = |key: &str, value: Value| {
            if !value.is_null() {
                form.insert(key.to_string(), value);
            }
        };
        set("base_url", json!(self.base_url));
        set("model", json!(self.model));
        set("persona", json!(self.persona));
        set("preview_text", json!(self.preview_text));
        set("speed", json!(self.speed));
        set("format", json!(self.format));
        set("sample_rate", json!(self.sample_rate));
        set("api_key", json!(self.api_key));
        form
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            response_timeout: self.response_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlaybackSettings {
    #[serde(default)]
    pub backend: PlaybackBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub preview: PreviewDefaults,

    #[serde(default)]
    pub playback: PlaybackSettings,
}

fn default_hass_url() -> String {
    "ws://homeassistant.local:8123/api/websocket".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_model() -> String {
    "kokoro".to_string()
}
