//! In-process backend for `tts/preview_audio`
//!
//! Calls a Kokoro (OpenAI-compatible) speech endpoint directly and answers
//! with the same reply shape the Home Assistant command produces, so a
//! preview can run without a Home Assistant instance.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{Channel, PendingReply};
use crate::preview::request::{PreviewRequest, PREVIEW_COMMAND};
use crate::preview::response::PreviewResponse;

const DEFAULT_API_KEY: &str = "not-needed";

#[derive(Debug, Clone)]
pub struct DirectConfig {
    pub request_timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct DirectChannel {
    client: Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
}

#[derive(Deserialize)]
struct IncomingCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    request: PreviewRequest,
}

/// JSON bodies some deployments answer with instead of raw audio
#[derive(Deserialize)]
struct JsonAudio {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
}

impl DirectChannel {
    pub fn new(config: DirectConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Produce the reply for one preview request. Backend problems become
    /// failure replies rather than errors.
    async fn synthesize(&self, request: &PreviewRequest) -> Value {
        let response = match self.fetch_audio(request).await {
            Ok((audio_data_base64, content_type)) => PreviewResponse::Success {
                audio_data_base64,
                content_type,
            },
            Err(e) => {
                error!("Preview synthesis failed: {e:#}");
                PreviewResponse::Failure {
                    message: format!("{e:#}"),
                }
            }
        };
        response.into_value()
    }

    /// Returns base64 audio and its content type
    async fn fetch_audio(&self, request: &PreviewRequest) -> Result<(String, String)> {
        let url = format!("{}/v1/audio/speech", request.base_url.trim_end_matches('/'));
        let body = speech_request(request);
        let api_key = request.api_key.as_deref().unwrap_or(DEFAULT_API_KEY);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Network error connecting to {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "(unable to read error response)".to_string());
            warn!(%status, body = %text, "Speech endpoint returned an error");
            bail!("{}", status_message(status, &text));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|t| t.to_lowercase().contains("application/json"));
        if !is_json {
            return encode_body(response, request).await;
        }

        let json: JsonAudio = response
            .json()
            .await
            .context("Unexpected JSON response; expected binary audio")?;
        if let Some(audio) = json.audio {
            return Ok((audio, content_type_for(request)));
        }
        match json.download_url.filter(|u| !u.is_empty()) {
            Some(download_url) => self.download(&download_url, request).await,
            None => bail!("JSON response did not contain audio or download_url"),
        }
    }

    async fn download(&self, url: &str, request: &PreviewRequest) -> Result<(String, String)> {
        debug!(url, "Fetching preview audio from download url");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Network error downloading audio from {url}"))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, url, "Audio download failed");
            bail!("Download URL fetch failed ({status})");
        }
        encode_body(response, request).await
    }
}

/// Base64 of a raw audio body plus the content type to report for it
async fn encode_body(response: Response, request: &PreviewRequest) -> Result<(String, String)> {
    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase());

    let bytes = response
        .bytes()
        .await
        .context("Failed to read audio bytes")?;
    debug!(bytes = bytes.len(), "Received preview audio");

    Ok((
        base64::engine::general_purpose::STANDARD.encode(&bytes),
        reply_content_type(header_type.as_deref(), request),
    ))
}

#[async_trait]
impl Channel for DirectChannel {
    async fn send(&self, message: Value) -> Result<PendingReply> {
        let command: IncomingCommand =
            serde_json::from_value(message).context("Malformed preview command")?;
        if command.kind != PREVIEW_COMMAND {
            bail!("Unknown command type: {}", command.kind);
        }

        command.request.validate()?;

        let reply = self.synthesize(&command.request).await;
        Ok(PendingReply::ready(Ok(reply)))
    }
}

fn speech_request(request: &PreviewRequest) -> SpeechRequest<'_> {
    SpeechRequest {
        model: &request.model,
        input: &request.text,
        voice: &request.persona,
        response_format: &request.format,
        stream: false,
        speed: Some(request.speed).filter(|s| (s - 1.0).abs() > 1e-6),
    }
}

/// MIME type for a requested output format
fn content_type_for(request: &PreviewRequest) -> String {
    match request.format.as_str() {
        "mp3" => "audio/mpeg".to_string(),
        "opus" => "audio/ogg".to_string(),
        "flac" => "audio/flac".to_string(),
        "pcm" => format!("audio/pcm;rate={}", request.sample_rate),
        _ => "audio/wav".to_string(),
    }
}

/// The server's audio type wins, except that a bare `audio/pcm` carries no
/// rate, so the requested one is attached.
fn reply_content_type(header: Option<&str>, request: &PreviewRequest) -> String {
    match header {
        Some(t) if t.starts_with("audio/") => {
            let essence = t.split(';').next().unwrap_or_default().trim();
            if essence == "audio/pcm" && !t.contains("rate=") {
                format!("{t};rate={}", request.sample_rate)
            } else {
                t.to_string()
            }
        }
        _ => content_type_for(request),
    }
}

fn status_message(status: StatusCode, body: &str) -> String {
    match status.as_u16() {
        400 => "Invalid request parameters. Check your model, voice, and format settings.".into(),
        401 => "Authentication failed. Check your API key configuration.".into(),
        403 => "Access forbidden. Your API key may not have permission for this operation.".into(),
        404 => "TTS endpoint not found. Verify your base URL configuration.".into(),
        422 => "Input validation failed. Check your text, voice, or model parameters.".into(),
        429 => "Rate limit exceeded. Please wait before making more requests.".into(),
        500 => "Server error. The TTS service is experiencing issues.".into(),
        502 => "Bad gateway. The TTS service may be temporarily unavailable.".into(),
        503 => "Service unavailable. The TTS service may be under maintenance.".into(),
        504 => "Gateway timeout. The TTS request took too long to process.".into(),
        code => format!("HTTP {code}: {body}"),
    }
}
