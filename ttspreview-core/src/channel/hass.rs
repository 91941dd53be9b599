//! Home Assistant websocket API client
//!
//! Speaks the `/api/websocket` protocol: an auth handshake followed by
//! commands carrying an integer `id`. Replies of type `result` are routed
//! back to the caller waiting on that id.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Channel, PendingReply};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

#[derive(Debug, Clone)]
pub struct HassConfig {
    /// e.g. `ws://homeassistant.local:8123/api/websocket`
    pub url: String,
    pub access_token: String,
}

pub struct HassChannel {
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

#[derive(Serialize)]
struct AuthMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: &'a str,
}

#[derive(Deserialize)]
struct IncomingMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<HassError>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct HassError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HassChannel {
    /// Connect and authenticate. Fails if the server rejects the token.
    pub async fn connect(config: &HassConfig) -> Result<Self> {
        let (ws_stream, _) = connect_async(config.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", config.url))?;

        let (mut write, mut read) = ws_stream.split();
        authenticate(&mut write, &mut read, &config.access_token).await?;
        info!(url = %config.url, "Authenticated with Home Assistant");

        let sink = Arc::new(tokio::sync::Mutex::new(write));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_loop(read, sink.clone(), pending.clone(), closed.clone()));

        Ok(Self {
            sink,
            pending,
            next_id: AtomicU64::new(1),
            closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for HassChannel {
    async fn send(&self, mut message: Value) -> Result<PendingReply> {
        if self.is_closed() {
            bail!("Home Assistant connection is closed");
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let Some(fields) = message.as_object_mut() else {
            bail!("Commands must be JSON objects");
        };
        fields.insert("id".to_string(), json!(id));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let text = serde_json::to_string(&message).context("Failed to serialize command")?;
        let sent = self.sink.lock().await.send(Message::Text(text)).await;
        if let Err(e) = sent {
            self.pending.lock().unwrap().remove(&id);
            return Err(e).context("Failed to send command to Home Assistant");
        }

        debug!(id, "Command sent");
        let pending = Arc::downgrade(&self.pending);
        Ok(PendingReply::new(rx).on_drop(move || {
            if let Some(pending) = pending.upgrade() {
                pending.lock().unwrap().remove(&id);
            }
        }))
    }
}

async fn authenticate<W, R>(write: &mut W, read: &mut R, access_token: &str) -> Result<()>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = match read.next().await {
            Some(msg) => msg.context("Websocket error during authentication")?,
            None => bail!("Connection closed during authentication"),
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => bail!("Connection closed during authentication"),
            _ => continue,
        };

        let incoming: IncomingMessage =
            serde_json::from_str(&text).context("Failed to parse authentication message")?;

        match incoming.kind.as_str() {
            "auth_required" => {
                let auth = AuthMessage {
                    kind: "auth",
                    access_token,
                };
                let json = serde_json::to_string(&auth).context("Failed to serialize auth")?;
                write
                    .send(Message::Text(json))
                    .await
                    .context("Failed to send auth message")?;
            }
            "auth_ok" => return Ok(()),
            "auth_invalid" => bail!(
                "Authentication rejected: {}",
                incoming.message.as_deref().unwrap_or("invalid access token")
            ),
            other => debug!(kind = other, "Ignoring message during authentication"),
        }
    }
}

async fn read_loop(
    mut read: futures_util::stream::SplitStream<WsStream>,
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    while let Some(msg_result) = read.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Home Assistant websocket error: {e:?}");
                break;
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Ping(data) => {
                if let Err(e) = sink.lock().await.send(Message::Pong(data)).await {
                    warn!("Failed to answer ping: {e:?}");
                }
                continue;
            }
            Message::Close(_) => break,
            _ => continue,
        };

        let incoming = match serde_json::from_str::<IncomingMessage>(&text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Failed to parse server message: {e:?}");
                continue;
            }
        };

        if incoming.kind != "result" {
            continue;
        }
        let Some(id) = incoming.id else {
            warn!("Result message without id");
            continue;
        };
        let Some(waiter) = pending.lock().unwrap().remove(&id) else {
            debug!(id, "Result for unknown command");
            continue;
        };
        let _ = waiter.send(Ok(into_reply(incoming)));
    }

    closed.store(true, Ordering::SeqCst);
    let waiters: Vec<_> = pending.lock().unwrap().drain().collect();
    if !waiters.is_empty() {
        warn!(count = waiters.len(), "Connection closed with commands pending");
    }
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(anyhow::anyhow!(
            "Home Assistant connection closed before reply"
        )));
    }
}

/// A successful result yields its payload. A failed result becomes
/// `{ success: false, message }` so it reads as a backend failure.
fn into_reply(incoming: IncomingMessage) -> Value {
    if incoming.success.unwrap_or(false) {
        return incoming.result.unwrap_or(Value::Null);
    }

    let (code, message) = match incoming.error {
        Some(error) => (error.code, error.message),
        None => (None, None),
    };
    json!({
        "success": false,
        "code": code,
        "message": message.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerStream = WebSocketStream<TcpStream>;

    async fn next_json(ws: &mut ServerStream) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut ServerStream, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    /// Accepts one client, performs the handshake expecting `token`
    async fn accept_authenticated(listener: &TcpListener, token: &str) -> ServerStream {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        send_json(&mut ws, json!({"type": "auth_required", "ha_version": "2024.1.0"})).await;

        let auth = next_json(&mut ws).await;
        assert_eq!(auth["type"], "auth");
        if auth["access_token"] == token {
            send_json(&mut ws, json!({"type": "auth_ok"})).await;
        } else {
            send_json(
                &mut ws,
                json!({"type": "auth_invalid", "message": "Invalid access token"}),
            )
            .await;
        }
        ws
    }

    async fn listen() -> (TcpListener, HassConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/api/websocket", listener.local_addr().unwrap());
        (
            listener,
            HassConfig {
                url,
                access_token: "token".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_result_routed_by_id() {
        let (listener, config) = listen().await;

        let server = tokio::spawn(async move {
            let mut ws = accept_authenticated(&listener, "token").await;
            let first = next_json(&mut ws).await;
            let second = next_json(&mut ws).await;
            assert_eq!(first["type"], "tts/preview_audio");

            // Answer out of order
            send_json(
                &mut ws,
                json!({"id": second["id"], "type": "result", "success": true, "result": {"n": 2}}),
            )
            .await;
            send_json(
                &mut ws,
                json!({"id": first["id"], "type": "result", "success": false,
                       "error": {"code": "preview_failed", "message": "bad persona"}}),
            )
            .await;
            ws
        });

        let channel = HassChannel::connect(&config).await.unwrap();
        let first = channel
            .send(json!({"type": "tts/preview_audio"}))
            .await
            .unwrap();
        let second = channel.send(json!({"type": "other"})).await.unwrap();

        assert_eq!(second.recv().await.unwrap(), json!({"n": 2}));
        let failure = first.recv().await.unwrap();
        assert_eq!(failure["success"], false);
        assert_eq!(failure["message"], "bad persona");

        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_token_fails_connect() {
        let (listener, mut config) = listen().await;
        config.access_token = "wrong".to_string();

        let server = tokio::spawn(async move {
            let _ws = accept_authenticated(&listener, "token").await;
        });

        let err = match HassChannel::connect(&config).await {
            Ok(_) => panic!("connect should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("Invalid access token"), "{err:#}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_command_is_forgotten() {
        let (listener, config) = listen().await;
        let (done_tx, done_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let mut ws = accept_authenticated(&listener, "token").await;
            let _unanswered = next_json(&mut ws).await;
            let _ = done_rx.await;
        });

        let channel = HassChannel::connect(&config).await.unwrap();
        let pending = channel.send(json!({"type": "tts/preview_audio"})).await.unwrap();
        assert_eq!(channel.pending.lock().unwrap().len(), 1);

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), pending.recv()).await;
        assert!(waited.is_err());
        assert!(channel.pending.lock().unwrap().is_empty());

        let _ = done_tx.send(());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_commands() {
        let (listener, config) = listen().await;

        let server = tokio::spawn(async move {
            let mut ws = accept_authenticated(&listener, "token").await;
            let _command = next_json(&mut ws).await;
            ws.close(None).await.unwrap();
        });

        let channel = HassChannel::connect(&config).await.unwrap();
        let pending = channel.send(json!({"type": "tts/preview_audio"})).await.unwrap();

        assert!(pending.recv().await.is_err());
        server.await.unwrap();
        assert!(channel.is_closed());
        assert!(channel.send(json!({"type": "again"})).await.is_err());
    }
}
