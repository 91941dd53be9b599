//! Turns loosely typed form values into a validated `PreviewRequest`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::PreviewError;

/// Command identifier the backend registers for previews
pub const PREVIEW_COMMAND: &str = "tts/preview_audio";

pub const DEFAULT_PREVIEW_TEXT: &str = "Hello, this is a preview of the selected persona.";
pub const DEFAULT_SPEED: f64 = 1.0;
pub const DEFAULT_FORMAT: &str = "wav";
pub const DEFAULT_SAMPLE_RATE: &str = "24000";

/// Form values as delivered by the host, keyed by field name
pub type FormData = Map<String, Value>;

/// A single synthesis request. Created fresh per user action and consumed
/// by `PreviewSession::preview`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub base_url: String,
    pub model: String,
    pub persona: String,
    pub text: String,
    pub speed: f64,
    pub format: String,
    pub sample_rate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Wire shape of the preview command: the request tagged with its type
#[derive(Serialize)]
struct PreviewCommand<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    request: &'a PreviewRequest,
}

impl PreviewRequest {
    /// Check the invariants `RequestBuilder` establishes. Requests built by
    /// hand or deserialized from elsewhere go through this before sending.
    pub fn validate(&self) -> Result<(), PreviewError> {
        for (field, value) in [
            ("base_url", &self.base_url),
            ("model", &self.model),
            ("persona", &self.persona),
            ("text", &self.text),
        ] {
            if value.trim().is_empty() {
                return Err(PreviewError::validation(format!("{field} is required")));
            }
        }
        check_speed(self.speed)
    }

    /// Serialize into the channel command
    /// `{ type: "tts/preview_audio", base_url, model, ... }`
    pub fn to_command(&self) -> serde_json::Result<Value> {
        serde_json::to_value(PreviewCommand {
            kind: PREVIEW_COMMAND,
            request: self,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RequestBuilder {
    default_text: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            default_text: DEFAULT_PREVIEW_TEXT.to_string(),
        }
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the sentence used when the form's text is blank. A blank
    /// replacement keeps the built-in sentence.
    pub fn with_default_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.default_text = text;
        }
        self
    }

    pub fn build(&self, form: &FormData) -> Result<PreviewRequest, PreviewError> {
        let base_url = required(form, "base_url")?;
        let model = required(form, "model")?;
        let persona = required(form, "persona")?;

        let text = match optional(form, "preview_text")? {
            Some(text) => Some(text),
            None => optional(form, "text")?,
        }
        .unwrap_or_else(|| self.default_text.clone());

        let speed = parse_speed(form.get("speed"))?;
        let format = optional(form, "format")?
            .map(|f| f.to_lowercase())
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
        let sample_rate =
            optional(form, "sample_rate")?.unwrap_or_else(|| DEFAULT_SAMPLE_RATE.to_string());
        let api_key = optional(form, "api_key")?;

        Ok(PreviewRequest {
            base_url,
            model,
            persona,
            text,
            speed,
            format,
            sample_rate,
            api_key,
        })
    }
}

fn required(form: &FormData, field: &str) -> Result<String, PreviewError> {
    optional(form, field)?.ok_or_else(|| PreviewError::validation(format!("{field} is required")))
}

/// Trimmed string value of a field; blank and null count as absent
fn optional(form: &FormData, field: &str) -> Result<Option<String>, PreviewError> {
    let value = match form.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => {
            return Err(PreviewError::validation(format!(
                "{field} must be a scalar value, got {other}"
            )))
        }
    };
    Ok(Some(value).filter(|v| !v.is_empty()))
}

fn parse_speed(value: Option<&Value>) -> Result<f64, PreviewError> {
    let speed = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_SPEED),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| PreviewError::validation(format!("speed {n} is out of range")))?,
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(DEFAULT_SPEED),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| PreviewError::validation(format!("speed '{s}' is not a number")))?,
        Some(other) => {
            return Err(PreviewError::validation(format!(
                "speed must be a number, got {other}"
            )))
        }
    };

    check_speed(speed)?;
    Ok(speed)
}

fn check_speed(speed: f64) -> Result<(), PreviewError> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(PreviewError::validation(format!(
            "speed must be greater than zero, got {speed}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn form(value: Value) -> FormData {
        match value {
            Value::Object(map) => map,
            _ => panic!("form must be an object"),
        }
    }

    #[test]
    fn test_blank_text_gets_defaults() {
        let request = RequestBuilder::new()
            .build(&form(json!({
                "base_url": "http://x",
                "model": "m",
                "persona": "p",
                "text": "",
            })))
            .unwrap();

        assert_eq!(request.text, DEFAULT_PREVIEW_TEXT);
        assert_eq!(request.speed, 1.0);
        assert_eq!(request.format, "wav");
        assert_eq!(request.sample_rate, "24000");
        assert_eq!(request.api_key, None);
    }

    #[test]
    fn test_preview_text_takes_precedence_over_text() {
        let request = RequestBuilder::new()
            .build(&form(json!({
                "base_url": "http://x",
                "model": "m",
                "persona": "p",
                "text": "fallback",
                "preview_text": "  Good morning  ",
            })))
            .unwrap();

        assert_eq!(request.text, "Good morning");
    }

    #[test]
    fn test_custom_default_text() {
        let request = RequestBuilder::new()
            .with_default_text("Testing one two")
            .build(&form(json!({"base_url": "http://x", "model": "m", "persona": "p"})))
            .unwrap();

        assert_eq!(request.text, "Testing one two");
    }

    #[test]
    fn test_numeric_fields_and_api_key() {
        let request = RequestBuilder::new()
            .build(&form(json!({
                "base_url": "http://kokoro:8880",
                "model": "kokoro",
                "persona": "af_heart",
                "speed": 0.9,
                "format": "MP3",
                "sample_rate": 44100,
                "api_key": "secret",
            })))
            .unwrap();

        assert_eq!(request.speed, 0.9);
        assert_eq!(request.format, "mp3");
        assert_eq!(request.sample_rate, "44100");
        assert_eq!(request.api_key.as_deref(), Some("secret"));
    }

    #[rstest]
    #[case("base_url")]
    #[case("model")]
    #[case("persona")]
    fn test_missing_required_field(#[case] field: &str) {
        let mut values = form(json!({"base_url": "http://x", "model": "m", "persona": "p"}));
        values.remove(field);
        let err = RequestBuilder::new().build(&values).unwrap_err();
        assert!(matches!(err, PreviewError::Validation(ref msg) if msg.contains(field)));

        values.insert(field.to_string(), json!("   "));
        let err = RequestBuilder::new().build(&values).unwrap_err();
        assert!(matches!(err, PreviewError::Validation(_)));
    }

    #[rstest]
    #[case(json!("fast"))]
    #[case(json!("0"))]
    #[case(json!(-1.5))]
    #[case(json!("NaN"))]
    #[case(json!("inf"))]
    #[case(json!([1.0]))]
    fn test_invalid_speed_is_rejected(#[case] speed: Value) {
        let values = form(json!({
            "base_url": "http://x",
            "model": "m",
            "persona": "p",
            "speed": speed,
        }));
        let err = RequestBuilder::new().build(&values).unwrap_err();
        assert!(matches!(err, PreviewError::Validation(_)), "{err:?}");
    }

    #[rstest]
    #[case(json!(null), 1.0)]
    #[case(json!(""), 1.0)]
    #[case(json!("1.25"), 1.25)]
    #[case(json!(" 2 "), 2.0)]
    #[case(json!(3), 3.0)]
    fn test_speed_parsing(#[case] speed: Value, #[case] expected: f64) {
        let values = form(json!({
            "base_url": "http://x",
            "model": "m",
            "persona": "p",
            "speed": speed,
        }));
        let request = RequestBuilder::new().build(&values).unwrap();
        assert_eq!(request.speed, expected);
    }

    #[rstest]
    #[case("", "m", "p", "hi", 1.0)]
    #[case("http://x", " ", "p", "hi", 1.0)]
    #[case("http://x", "m", "", "hi", 1.0)]
    #[case("http://x", "m", "p", "", 1.0)]
    #[case("http://x", "m", "p", "hi", 0.0)]
    #[case("http://x", "m", "p", "hi", f64::NAN)]
    fn test_validate_rejects_hand_built_requests(
        #[case] base_url: &str,
        #[case] model: &str,
        #[case] persona: &str,
        #[case] text: &str,
        #[case] speed: f64,
    ) {
        let request = PreviewRequest {
            base_url: base_url.to_string(),
            model: model.to_string(),
            persona: persona.to_string(),
            text: text.to_string(),
            speed,
            format: "wav".to_string(),
            sample_rate: "24000".to_string(),
            api_key: None,
        };
        assert!(matches!(
            request.validate(),
            Err(PreviewError::Validation(_))
        ));
    }

    #[test]
    fn test_command_shape() {
        let request = RequestBuilder::new()
            .build(&form(json!({"base_url": "http://x", "model": "m", "persona": "p"})))
            .unwrap();

        let command = request.to_command().unwrap();
        assert_eq!(
            command,
            json!({
                "type": "tts/preview_audio",
                "base_url": "http://x",
                "model": "m",
                "persona": "p",
                "text": DEFAULT_PREVIEW_TEXT,
                "speed": 1.0,
                "format": "wav",
                "sample_rate": "24000",
            })
        );
    }
}
