#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

/// How the server answers new connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Accept,
    /// Refuse the upgrade with HTTP 401.
    Unauthorized,
    /// Drop the TCP stream before the handshake.
    Drop,
}

enum ConnectionCommand {
    SendJson(Value),
    SendText(String),
    CloseWith(u16, String),
    ForceClose,
    Stall,
}

pub struct MockConnection {
    index: usize,
    token: Option<String>,
    frame_rx: mpsc::Receiver<Value>,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

impl MockConnection {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Token the client presented in the query string.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub async fn recv_frame(&mut self) -> Value {
        timeout(STEP_TIMEOUT, self.frame_rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("mock connection frame channel closed")
    }

    pub async fn recv_frame_type(&mut self, expected_type: &str) -> Value {
        let frame = self.recv_frame().await;
        let kind = frame.get("type").and_then(Value::as_str);
        assert_eq!(kind, Some(expected_type), "unexpected frame: {frame}");
        frame
    }

    /// Skip frames until one of `expected_type` arrives.
    pub async fn recv_until_type(&mut self, expected_type: &str) -> Value {
        loop {
            let frame = self.recv_frame().await;
            if frame.get("type").and_then(Value::as_str) == Some(expected_type) {
                return frame;
            }
        }
    }

    pub async fn try_recv_frame(&mut self, wait: Duration) -> Option<Value> {
        match timeout(wait, self.frame_rx.recv()).await {
            Ok(frame) => frame,
            Err(_) => None,
        }
    }

    pub async fn send_json(&self, value: Value) {
        self.command_tx
            .send(ConnectionCommand::SendJson(value))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn send_text(&self, text: &str) {
        self.command_tx
            .send(ConnectionCommand::SendText(text.to_string()))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn send_result(&self, correlation_id: u64, data: Value) {
        self.send_json(json!({
            "type": "result",
            "correlationId": correlation_id,
            "data": data,
        }))
        .await;
    }

    pub async fn send_error(&self, correlation_id: u64, message: &str) {
        self.send_json(json!({
            "type": "error",
            "correlationId": correlation_id,
            "message": message,
        }))
        .await;
    }

    pub async fn push(&self, frame: Value) {
        self.send_json(frame).await;
    }

    /// Send a close frame with `code`, then hang up.
    pub async fn close_with(&self, code: u16, reason: &str) {
        let _ = self
            .command_tx
            .send(ConnectionCommand::CloseWith(code, reason.to_string()))
            .await;
    }

    /// Hang up without a close frame.
    pub async fn force_close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::ForceClose).await;
    }

    /// Stop reading from the socket and keep it open, so the client's
    /// writes back up once the buffers fill.
    pub async fn stall(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Stall).await;
    }

    /// Wait until the client side has hung up.
    pub async fn wait_closed(&mut self) {
        timeout(STEP_TIMEOUT, async {
            while self.frame_rx.recv().await.is_some() {}
        })
        .await
        .expect("timed out waiting for client to close");
    }
}

pub struct MockGameServer {
    addr: SocketAddr,
    connection_rx: mpsc::Receiver<MockConnection>,
    attempts: Arc<AtomicUsize>,
    mode: Arc<Mutex<HandshakeMode>>,
    server_task: JoinHandle<()>,
}

impl MockGameServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (connection_tx, connection_rx) = mpsc::channel(16);
        let attempts = Arc::new(AtomicUsize::new(0));
        let mode = Arc::new(Mutex::new(HandshakeMode::Accept));

        let server_task = {
            let attempts = Arc::clone(&attempts);
            let mode = Arc::clone(&mode);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };

                    let connection_index = attempts.fetch_add(1, Ordering::SeqCst);
                    let current_mode = *mode.lock().unwrap();
                    if current_mode == HandshakeMode::Drop {
                        drop(stream);
                        continue;
                    }

                    let connection_tx = connection_tx.clone();
                    tokio::spawn(serve_connection(
                        stream,
                        connection_index,
                        current_mode,
                        connection_tx,
                    ));
                }
            })
        };

        Ok(Self {
            addr,
            connection_rx,
            attempts,
            mode,
            server_task,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// TCP connections seen so far, including refused ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: HandshakeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub async fn accept_connection(&mut self) -> MockConnection {
        timeout(STEP_TIMEOUT, self.connection_rx.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("mock server connection channel closed")
    }

    pub async fn try_accept_connection(&mut self, wait: Duration) -> Option<MockConnection> {
        match timeout(wait, self.connection_rx.recv()).await {
            Ok(Some(connection)) => Some(connection),
            _ => None,
        }
    }
}

impl Drop for MockGameServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    index: usize,
    mode: HandshakeMode,
    connection_tx: mpsc::Sender<MockConnection>,
) {
    let mut token = None;
    let callback = |request: &Request, response: Response| {
        token = request.uri().query().and_then(|query| {
            query
                .split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .map(str::to_string)
        });
        if mode == HandshakeMode::Unauthorized {
            let mut refusal = ErrorResponse::new(Some("unauthorized".to_string()));
            *refusal.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(refusal);
        }
        Ok(response)
    };

    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (command_tx, mut command_rx) = mpsc::channel(64);

    let connection = MockConnection {
        index,
        token,
        frame_rx,
        command_tx,
    };
    if connection_tx.send(connection).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            maybe_command = command_rx.recv() => {
                match maybe_command {
                    Some(ConnectionCommand::SendJson(value)) => {
                        let message = Message::Text(value.to_string().into());
                        if ws_sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnectionCommand::SendText(text)) => {
                        if ws_sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnectionCommand::CloseWith(code, reason)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = ws_sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    Some(ConnectionCommand::Stall) => {
                        std::future::pending::<()>().await;
                    }
                    Some(ConnectionCommand::ForceClose) | None => break,
                }
            }
            maybe_message = ws_source.next() => {
                match maybe_message {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&text) {
                            let _ = frame_tx.send(value).await;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

pub fn correlation_id(frame: &Value) -> u64 {
    frame
        .get("correlationId")
        .and_then(Value::as_u64)
        .expect("frame missing numeric correlationId")
}

/// Poll `condition` every few milliseconds until it holds.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Answer every correlated frame on `connection` with `reply(type)` until
/// the connection closes. Uncorrelated frames are ignored.
pub fn spawn_responder<F>(mut connection: MockConnection, reply: F) -> JoinHandle<Vec<Value>>
where
    F: Fn(&str) -> Result<Value, String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(frame) = connection.frame_rx.recv().await {
            if let Some(id) = frame.get("correlationId").and_then(Value::as_u64) {
                let kind = frame.get("type").and_then(Value::as_str).unwrap_or_default();
                let answer = match reply(kind) {
                    Ok(data) => json!({"type": "result", "correlationId": id, "data": data}),
                    Err(message) => json!({"type": "error", "correlationId": id, "message": message}),
                };
                // The client may already be gone; the next recv ends the loop.
                let _ = connection
                    .command_tx
                    .send(ConnectionCommand::SendJson(answer))
                    .await;
            }
            seen.push(frame);
        }
        seen
    })
}
