//! Asks a Kokoro server which models and voices it offers
//!
//! Servers differ in what they expose, so every failure here is soft: a
//! missing or unreadable endpoint falls back to the built-in catalogue and
//! the `kokoro` model.

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::personas::PERSONAS;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(8);
const FALLBACK_MODEL: &str = "kokoro";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub models: Vec<String>,
    pub personas: Vec<String>,
    /// False when the voice list is the built-in catalogue
    pub personas_from_server: bool,
}

pub async fn discover(base_url: &str, api_key: Option<&str>) -> Result<Discovery> {
    let client = Client::builder()
        .timeout(DISCOVERY_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;
    let base = base_url.trim_end_matches('/');
    let api_key = api_key.filter(|k| !k.trim().is_empty());

    let mut models = match get_json(&client, &format!("{base}/v1/models"), api_key).await {
        Ok(body) => parse_models(&body),
        Err(e) => {
            debug!("Model discovery failed for {base}: {e:#}");
            Vec::new()
        }
    };
    let mut personas = match get_json(&client, &format!("{base}/v1/audio/voices"), api_key).await
    {
        Ok(body) => parse_personas(&body),
        Err(e) => {
            debug!("Voice discovery failed for {base}: {e:#}");
            Vec::new()
        }
    };

    let personas_from_server = !personas.is_empty();
    if !personas_from_server {
        debug!("No voices discovered, using the built-in catalogue");
        personas = PERSONAS.iter().map(|p| p.id.to_string()).collect();
    }
    if models.is_empty() {
        models.push(FALLBACK_MODEL.to_string());
    }

    debug!(
        models = models.len(),
        personas = personas.len(),
        "Discovery complete"
    );
    Ok(Discovery {
        models,
        personas,
        personas_from_server,
    })
}

async fn get_json(client: &Client, url: &str, api_key: Option<&str>) -> Result<Value> {
    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.context("Request failed")?;
    let status = response.status();
    if !status.is_success() {
        bail!("{url} returned {status}");
    }
    response.json().await.context("Response was not JSON")
}

/// `{ "data": [{ "id": ... }, ...] }`
fn parse_models(body: &Value) -> Vec<String> {
    let Some(items) = body.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item.get("id")? {
            Value::Null => None,
            Value::String(id) if id.is_empty() => None,
            Value::String(id) => Some(id.clone()),
            other => Some(other.to_string()),
        })
        .collect()
}

/// `{ "voices": [...] }`, `{ "personas": [...] }` or a bare array. Only
/// string entries count.
fn parse_personas(body: &Value) -> Vec<String> {
    let list = match body {
        Value::Array(list) => Some(list),
        Value::Object(map) => map
            .get("voices")
            .and_then(Value::as_array)
            .or_else(|| map.get("personas").and_then(Value::as_array)),
        _ => None,
    };
    list.into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_voice_list_shapes() {
        assert_eq!(
            parse_personas(&json!({"voices": ["af_heart", 3, "am_adam"]})),
            vec!["af_heart", "am_adam"]
        );
        assert_eq!(
            parse_personas(&json!({"personas": ["bf_emma"]})),
            vec!["bf_emma"]
        );
        assert_eq!(parse_personas(&json!(["jf_alpha"])), vec!["jf_alpha"]);
        assert!(parse_personas(&json!({"other": []})).is_empty());
    }

    #[test]
    fn test_model_ids() {
        assert_eq!(
            parse_models(&json!({"data": [{"id": "kokoro"}, {"id": ""}, {"name": "x"}, "bad"]})),
            vec!["kokoro"]
        );
        assert!(parse_models(&json!(["kokoro"])).is_empty());
    }

    #[tokio::test]
    async fn test_discovers_from_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"id": "kokoro"}, {"id": "kokoro-v1"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/audio/voices"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"voices": ["af_heart", "my_mix"]})),
            )
            .mount(&server)
            .await;

        let found = discover(&format!("{}/", server.uri()), Some("secret"))
            .await
            .unwrap();

        assert_eq!(found.models, vec!["kokoro", "kokoro-v1"]);
        assert_eq!(found.personas, vec!["af_heart", "my_mix"]);
        assert!(found.personas_from_server);
    }

    #[tokio::test]
    async fn test_falls_back_when_server_has_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/audio/voices"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let found = discover(&server.uri(), None).await.unwrap();

        assert_eq!(found.models, vec!["kokoro"]);
        assert_eq!(found.personas.len(), PERSONAS.len());
        assert_eq!(found.personas[0], "af_heart");
        assert!(!found.personas_from_server);
    }
}
