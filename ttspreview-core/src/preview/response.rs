use serde::Deserialize;
use serde_json::{json, Value};

use super::error::DecodeError;

/// Reply to a preview command. Exactly one branch is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewResponse {
    Success {
        audio_data_base64: String,
        content_type: String,
    },
    Failure {
        message: String,
    },
}

#[derive(Deserialize)]
struct RawResponse {
    success: bool,
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PreviewResponse {
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let raw: RawResponse = serde_json::from_value(value)
            .map_err(|e| DecodeError::MalformedResponse(e.to_string()))?;

        if !raw.success {
            return Ok(Self::Failure {
                message: raw
                    .message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        let audio_data_base64 = raw.audio_data.ok_or_else(|| {
            DecodeError::MalformedResponse("success response without audio_data".to_string())
        })?;

        Ok(Self::Success {
            audio_data_base64,
            content_type: raw.content_type.unwrap_or_default(),
        })
    }

    /// Wire form, as a backend would send it
    pub fn into_value(self) -> Value {
        match self {
            Self::Success {
                audio_data_base64,
                content_type,
            } => json!({
                "success": true,
                "audio_data": audio_data_base64,
                "content_type": content_type,
            }),
            Self::Failure { message } => json!({
                "success": false,
                "message": message,
            }),
        }
    }
}
