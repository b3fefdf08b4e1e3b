use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::ApiError;

/// A push event delivered over the host's subscribed channel
/// (`private-hosts.<host_id>`), with or without the `App\Events\` prefix
/// the server may send event names under.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub name: String,
    pub data: Value,
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// The WebSocket transport: primarily a push-event source (see
/// [`PushEvent`]) subscribed to one channel. It can also carry RPC
/// commands, but this implementation does not correlate request/response
/// frames over the socket — `command()` always reports itself unsupported
/// so the façade falls back to HTTP. Kept as a real (if partial) transport
/// rather than a stub, since the push-subscription half is load-bearing for
/// the bot source.
pub struct SocketClient {
    connected: Arc<AtomicBool>,
    _reader: tokio::task::JoinHandle<()>,
}

impl SocketClient {
    pub async fn connect(url: &str, channel: &str) -> anyhow::Result<(Self, mpsc::Receiver<PushEvent>)> {
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let subscribe = serde_json::json!({
            "event": "subscribe",
            "data": { "channel": channel },
        });
        sink.send(Message::Text(subscribe.to_string().into())).await?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let connected = Arc::new(AtomicBool::new(true));
        let connected_for_task = connected.clone();

        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(err) => {
                        log::warn!("push channel error: {err}");
                        break;
                    }
                };
                let Message::Text(text) = msg else { continue };
                let frame: RawFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                let name = frame.event.trim_start_matches("App\\Events\\").to_string();
                if events_tx
                    .send(PushEvent {
                        name,
                        data: frame.data,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            connected_for_task.store(false, Ordering::Relaxed);
        });

        Ok((
            Self {
                connected,
                _reader: reader,
            },
            events_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn command(&self, _name: &str, _data: Option<Value>) -> Result<Option<Value>, ApiError> {
        Err(ApiError::Transport(
            "RPC-over-websocket is not implemented; falls back to HTTP".into(),
        ))
    }
}
