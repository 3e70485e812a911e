//! WebSocket client built on `tokio-tungstenite`.
//!
//! The client is single-shot: `run` connects, fires `on_open` and spawns one
//! reader task, then returns. Reconnect policy belongs to the owner of the
//! client (typically its `on_close` handler), not to the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::{EngineError, Result};

/// Maximum inbound frame size accepted by the reader
const READ_LIMIT: usize = 640 * 1024;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection parameters remembered across reconnects
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket endpoint URL
    pub endpoint: String,
    /// Whether the client sends keep-alive pings
    pub keep_alive: bool,
    /// Ping interval and maximum tolerated pong silence
    pub timeout: Duration,
}

/// Event handlers invoked by the transport.
///
/// All methods default to no-ops so implementors only override the events
/// they care about.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Fired once per successful connect, before the reader starts
    async fn on_open(&self, _ws: &Arc<WsClient>) {}

    /// Fired for every inbound text or binary frame
    async fn on_message(&self, _ws: &Arc<WsClient>, _data: &[u8]) {}

    /// Fired when the reader terminates on a transport error.
    ///
    /// Not fired when the close was requested through [`WsClient::close`].
    async fn on_error(&self, _err: anyhow::Error) {}

    /// Fired exactly once when the reader exits, for any reason
    async fn on_close(&self, _ws: &Arc<WsClient>) {}

    /// Fired for inbound ping control frames
    async fn on_ping(&self, _ws: &Arc<WsClient>, _payload: Vec<u8>) {}

    /// Fired for inbound pong control frames
    async fn on_pong(&self, _payload: Vec<u8>) {}
}

/// Full-duplex WebSocket client with pluggable handlers
pub struct WsClient {
    handler: Arc<dyn WsHandler>,
    config: Mutex<Option<WsConfig>>,
    writer: Mutex<Option<WsSink>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WsClient {
    /// Create a client around the given handler
    pub fn new(handler: Arc<dyn WsHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            config: Mutex::new(None),
            writer: Mutex::new(None),
            stop_tx: Mutex::new(None),
            reader: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Whether the client is marked as running.
    ///
    /// Stays `true` across server-initiated closes so `on_close` handlers can
    /// decide to reconnect; cleared only by [`close`](Self::close).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Connection parameters of the most recent `run` call
    pub async fn config(&self) -> Option<WsConfig> {
        self.config.lock().await.clone()
    }

    /// Connect to `endpoint`, fire `on_open` and start the reader task.
    ///
    /// Returns once the reader is spawned; connect failures are returned
    /// synchronously.
    pub async fn run(
        self: Arc<Self>,
        endpoint: &str,
        keep_alive: bool,
        timeout: Duration,
    ) -> Result<()> {
        url::Url::parse(endpoint)
            .map_err(|e| EngineError::Connection(format!("invalid endpoint {endpoint}: {e}")))?;

        let mut frame_config = WebSocketConfig::default();
        frame_config.max_message_size = Some(READ_LIMIT);
        frame_config.max_frame_size = Some(READ_LIMIT);

        let (stream, _) = connect_async_with_config(endpoint, Some(frame_config), false)
            .await
            .map_err(|e| EngineError::Connection(format!("connect to {endpoint}: {e}")))?;
        let (sink, source) = stream.split();

        *self.writer.lock().await = Some(sink);
        *self.config.lock().await = Some(WsConfig {
            endpoint: endpoint.to_string(),
            keep_alive,
            timeout,
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.lock().await = Some(stop_tx);
        self.running.store(true, Ordering::SeqCst);

        self.handler.on_open(&self).await;

        let client = Arc::clone(&self);
        let task = tokio::spawn(read_loop(client, source, stop_rx, keep_alive, timeout));
        *self.reader.lock().await = Some(task);

        Ok(())
    }

    /// Serialize `value` as JSON and write it as a text frame
    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|e| EngineError::Parse(format!("encode outbound frame: {e}")))?;
        self.write(Message::Text(payload)).await
    }

    /// Write a pong control frame
    pub async fn send_pong(&self, payload: Vec<u8>) -> Result<()> {
        self.write(Message::Pong(payload)).await
    }

    /// Write a ping control frame
    pub async fn send_ping(&self, payload: Vec<u8>) -> Result<()> {
        self.write(Message::Ping(payload)).await
    }

    async fn write(&self, message: Message) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| EngineError::Connection("socket is not connected".to_string()))?;
        sink.send(message)
            .await
            .map_err(|e| EngineError::Connection(format!("write frame: {e}")))?;
        Ok(())
    }

    /// Signal graceful shutdown and wait for the reader to finish.
    ///
    /// The reader exits silently (no `on_error`) and `on_close` fires exactly
    /// once.
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(true);
        }
        let task = self.reader.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn read_loop(
    client: Arc<WsClient>,
    mut source: WsSource,
    mut stop_rx: watch::Receiver<bool>,
    keep_alive: bool,
    timeout: Duration,
) {
    let keep_alive = keep_alive && timeout > Duration::ZERO;
    let ping_period = if keep_alive {
        timeout
    } else {
        Duration::from_secs(3600)
    };
    let mut ping_timer = tokio::time::interval(ping_period);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping_timer.tick().await;

    let mut last_pong = Instant::now();
    let mut silent = false;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                silent = true;
                break;
            }
            _ = ping_timer.tick(), if keep_alive => {
                if last_pong.elapsed() > timeout {
                    debug!("no pong within {:?}, closing connection", timeout);
                    break;
                }
                if client.send_ping(Vec::new()).await.is_err() {
                    break;
                }
            }
            frame = source.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        client.handler.on_message(&client, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        client.handler.on_message(&client, &data).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        client.handler.on_ping(&client, payload).await;
                    }
                    Some(Ok(Message::Pong(payload))) => {
                        last_pong = Instant::now();
                        client.handler.on_pong(payload).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if !silent {
                            client.handler.on_error(e.into()).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    // Drop the sink so the TCP connection is released before on_close runs;
    // a reconnecting handler installs a fresh one through run().
    client.writer.lock().await.take();
    client.handler.on_close(&client).await;
}
