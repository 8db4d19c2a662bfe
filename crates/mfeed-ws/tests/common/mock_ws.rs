//! Mock feed server for integration tests.
//!
//! Provides a WebSocket server that can:
//! - Accept connections and count them
//! - Push scripted frames right after the handshake
//! - Push a periodic frame while connected
//! - Answer (or ignore) client heartbeat pings
//! - Record received text messages and close codes per connection

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Per-connection script.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Raw text frames sent right after the handshake.
    pub greeting: Vec<String>,
    /// Raw binary frames sent after the text greeting.
    pub binary_greeting: Vec<Vec<u8>>,
    /// Frame pushed on a fixed period while the connection is open.
    pub tick: Option<(Duration, String)>,
    /// Close right after the handshake (and greeting).
    pub close_after_accept: bool,
    /// Never answer client heartbeat pings.
    pub silent: bool,
}

#[derive(Debug, Default)]
struct Recorded {
    connections: u32,
    messages: Vec<(u32, String)>,
    close_codes: Vec<u16>,
}

pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockFeedServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), behavior).await
    }

    /// Start on a fixed address, e.g. one a client is already retrying.
    pub async fn start_on(addr: SocketAddr, behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recorded_clone = recorded.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let conn_id = {
                            let mut rec = recorded_clone.lock().await;
                            rec.connections += 1;
                            rec.connections
                        };
                        tokio::spawn(handle_connection(
                            stream,
                            conn_id,
                            behavior.clone(),
                            recorded_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            recorded,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/api/ws?topic=market", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.recorded.lock().await.connections
    }

    /// Text messages received on one connection (1-based id).
    pub async fn messages_for(&self, conn_id: u32) -> Vec<String> {
        self.recorded
            .lock()
            .await
            .messages
            .iter()
            .filter(|(id, _)| *id == conn_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub async fn all_messages(&self) -> Vec<String> {
        self.recorded
            .lock()
            .await
            .messages
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub async fn close_codes(&self) -> Vec<u16> {
        self.recorded.lock().await.close_codes.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_id: u32,
    behavior: MockBehavior,
    recorded: Arc<Mutex<Recorded>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    for frame in &behavior.greeting {
        if write.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    for frame in &behavior.binary_greeting {
        if write.send(Message::Binary(frame.clone())).await.is_err() {
            return;
        }
    }

    if behavior.close_after_accept {
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    let (period, tick_frame) = match &behavior.tick {
        Some((period, frame)) => (*period, Some(frame.clone())),
        None => (Duration::from_secs(3600), None),
    };
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick(), if tick_frame.is_some() => {
                if let Some(frame) = &tick_frame {
                    if write.send(Message::Text(frame.clone())).await.is_err() {
                        break;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        recorded.lock().await.messages.push((conn_id, text.clone()));

                        let is_ping = serde_json::from_str::<serde_json::Value>(&text)
                            .map(|v| v["type"] == "ping")
                            .unwrap_or(false);
                        if is_ping && !behavior.silent {
                            let pong = serde_json::json!({"type": "pong"}).to_string();
                            let _ = write.send(Message::Text(pong)).await;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                        recorded.lock().await.close_codes.push(code);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
}
