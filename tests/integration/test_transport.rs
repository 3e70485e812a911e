//! Transport behavior against a local WebSocket server: delivery, silent
//! client close and handler-driven reconnect

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tri_arbitrage::ws::{WsClient, WsHandler};

#[derive(Default)]
struct RecordingHandler {
    messages: Mutex<Vec<String>>,
    closes: AtomicUsize,
    errors: AtomicUsize,
    reconnect: bool,
}

impl RecordingHandler {
    fn reconnecting() -> Self {
        Self {
            reconnect: true,
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WsHandler for RecordingHandler {
    async fn on_message(&self, _ws: &Arc<WsClient>, data: &[u8]) {
        self.messages
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).to_string());
    }

    async fn on_error(&self, _err: anyhow::Error) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_close(&self, ws: &Arc<WsClient>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.reconnect && ws.is_running() {
            if let Some(config) = ws.config().await {
                let _ = Arc::clone(ws)
                    .run(&config.endpoint, config.keep_alive, config.timeout)
                    .await;
            }
        }
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test]
async fn test_messages_delivered_and_server_close_fires_on_close_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("one".to_string())).await.unwrap();
        ws.send(Message::Text("two".to_string())).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let handler = Arc::new(RecordingHandler::default());
    let client = WsClient::new(Arc::clone(&handler) as Arc<dyn WsHandler>);
    Arc::clone(&client)
        .run(&endpoint, false, Duration::ZERO)
        .await
        .unwrap();

    {
        let handler = Arc::clone(&handler);
        wait_for(move || handler.closes() == 1).await;
    }

    assert_eq!(handler.messages(), vec!["one", "two"]);
    assert_eq!(handler.errors(), 0);
    assert_eq!(handler.closes(), 1);
}

#[tokio::test]
async fn test_client_close_is_silent_and_awaits_reader() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("hello".to_string())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let handler = Arc::new(RecordingHandler::default());
    let client = WsClient::new(Arc::clone(&handler) as Arc<dyn WsHandler>);
    Arc::clone(&client)
        .run(&endpoint, false, Duration::ZERO)
        .await
        .unwrap();

    {
        let handler = Arc::clone(&handler);
        wait_for(move || !handler.messages().is_empty()).await;
    }

    client.close().await;

    // close() waits for the reader, so on_close has already fired, exactly
    // once and without a transport error.
    assert_eq!(handler.closes(), 1);
    assert_eq!(handler.errors(), 0);
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_handler_reconnects_while_running() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        // First connection: one message, then a server-side close.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("first".to_string())).await.unwrap();
        ws.close(None).await.unwrap();

        // Second connection after the handler reconnects.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("second".to_string())).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let handler = Arc::new(RecordingHandler::reconnecting());
    let client = WsClient::new(Arc::clone(&handler) as Arc<dyn WsHandler>);
    Arc::clone(&client)
        .run(&endpoint, false, Duration::ZERO)
        .await
        .unwrap();

    {
        let handler = Arc::clone(&handler);
        wait_for(move || handler.messages().len() == 2).await;
    }
    assert_eq!(handler.messages(), vec!["first", "second"]);

    client.close().await;
    // One close per connection; the final close does not reconnect.
    assert_eq!(handler.closes(), 2);
    assert!(!client.is_running());
}
