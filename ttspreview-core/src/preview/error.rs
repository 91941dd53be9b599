use thiserror::Error;

/// Everything that can end a preview attempt. Each variant is terminal for
/// the current attempt only; the session is ready for the next preview
/// once the error has been returned.
#[derive(Error, Debug)]
pub enum PreviewError {
    /// Bad form input. Nothing was sent.
    #[error("Invalid preview parameters: {0}")]
    Validation(String),

    /// A preview request is already in flight.
    #[error("A preview is already in progress")]
    Busy,

    #[error("Network error during preview: {0:#}")]
    Transport(anyhow::Error),

    /// The backend answered with `success: false`.
    #[error("Preview failed: {0}")]
    Synthesis(String),

    #[error("Failed to decode preview audio: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unable to play preview audio: {0:#}")]
    Playback(anyhow::Error),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("audio data is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("audio data is empty")]
    Empty,

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl PreviewError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short machine-friendly name of the variant, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Busy => "busy",
            Self::Transport(_) => "transport",
            Self::Synthesis(_) => "synthesis",
            Self::Decode(_) => "decode",
            Self::Playback(_) => "playback",
        }
    }
}
