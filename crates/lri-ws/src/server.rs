// SPDX-License-Identifier: Apache-2.0
//! LHS WebSocket server: one task per connection, a shared session table,
//! per-connection outboxes drained by writer tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lri_envelope::Lce;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::protocol::{
    default_features, feature_intersection, negotiate, Encoding, Handshake, LRI_VERSION,
};
use crate::{decode_payload, encode_payload, WsError};

/// Callback invoked for every inbound envelope:
/// `(lce, session_id, thread_id)`.
pub type MessageHandler = Arc<dyn Fn(Lce, &str, &str) + Send + Sync>;

/// Server construction options.
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to bind; `0` picks a free port (see
    /// [`WsServer::local_addr`]).
    pub port: u16,
    /// Encodings this server accepts, in its own preference order.
    pub encodings: Vec<Encoding>,
    /// Advisory features mirrored back to clients.
    pub features: Vec<String>,
    /// Identifier sent in Mirror frames.
    pub server_id: String,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            encodings: vec![Encoding::Json, Encoding::Cbor],
            features: default_features(),
            server_id: format!("lri-server-{}", Uuid::new_v4()),
        }
    }
}

struct SessionHandle {
    thread_id: String,
    encoding: Encoding,
    outbox: mpsc::Sender<Message>,
}

struct Shared {
    config: WsServerConfig,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    handler: std::sync::Mutex<Option<MessageHandler>>,
}

impl Shared {
    fn current_handler(&self) -> Option<MessageHandler> {
        match self.handler.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// LHS WebSocket server.
///
/// Each accepted connection runs the Hello→Seal handshake; on success the
/// fresh `session_id` is inserted into the session table and payload frames
/// flow until either side closes. The table is the only shared mutable
/// state and its lock is never held across socket I/O.
pub struct WsServer {
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
}

impl WsServer {
    /// Server with the given options. Call [`start`](WsServer::start) to
    /// begin accepting.
    pub fn new(config: WsServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                sessions: Mutex::new(HashMap::new()),
                handler: std::sync::Mutex::new(None),
            }),
            accept_task: Mutex::new(None),
            conn_tasks: Arc::new(Mutex::new(Vec::new())),
            local_addr: std::sync::Mutex::new(None),
        }
    }

    /// Register the inbound-envelope callback. Replaces any previous one.
    pub fn on_message(&self, handler: impl Fn(Lce, &str, &str) + Send + Sync + 'static) {
        let slot: MessageHandler = Arc::new(handler);
        match self.shared.handler.lock() {
            Ok(mut guard) => *guard = Some(slot),
            Err(poisoned) => *poisoned.into_inner() = Some(slot),
        }
    }

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address (useful with port `0`).
    ///
    /// # Errors
    ///
    /// [`WsError::Io`] if the listener cannot bind.
    pub async fn start(&self) -> Result<SocketAddr, WsError> {
        let config = &self.shared.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(addr);
        }
        info!(%addr, server_id = %config.server_id, "LHS server listening");

        let shared = self.shared.clone();
        let conn_tasks = self.conn_tasks.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let shared = shared.clone();
                        let handle = tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, peer, shared).await {
                                warn!(%peer, %err, "connection ended with error");
                            }
                        });
                        let mut tasks = conn_tasks.lock().await;
                        tasks.retain(|task| !task.is_finished());
                        tasks.push(handle);
                    }
                    Err(err) => {
                        warn!(%err, "accept failed; stopping listener");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock().await = Some(task);
        Ok(addr)
    }

    /// The bound address, once [`start`](WsServer::start) has succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|slot| *slot)
    }

    /// Encode and queue an envelope for a live session.
    ///
    /// # Errors
    ///
    /// [`WsError::SessionNotFound`] for an unknown `session_id`,
    /// [`WsError::ConnectionClosed`] if the connection went away, or a
    /// codec failure from the negotiated encoding.
    pub async fn send(&self, session_id: &str, lce: &Lce) -> Result<(), WsError> {
        let (encoding, outbox) = {
            let sessions = self.shared.sessions.lock().await;
            let handle = sessions
                .get(session_id)
                .ok_or_else(|| WsError::SessionNotFound(session_id.to_owned()))?;
            (handle.encoding, handle.outbox.clone())
        };
        let frame = encode_payload(encoding, lce)?;
        outbox
            .send(frame)
            .await
            .map_err(|_| WsError::ConnectionClosed)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.shared.sessions.lock().await.len()
    }

    /// Live session identifiers, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.sessions.lock().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Stop accepting, close every live connection, clear the session
    /// table.
    pub async fn stop(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        {
            let mut sessions = self.shared.sessions.lock().await;
            for (_, handle) in sessions.drain() {
                let _ = handle.outbox.try_send(Message::Close(None));
            }
        }
        let mut tasks = self.conn_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("LHS server stopped");
    }
}

/// Read handshake frames until one text frame arrives. Binary traffic
/// before Seal breaks the protocol.
async fn next_handshake(ws: &mut WebSocketStream<TcpStream>) -> Result<Handshake, WsError> {
    loop {
        let Some(frame) = ws.next().await else {
            return Err(WsError::ConnectionClosed);
        };
        match frame? {
            Message::Text(text) => return Handshake::from_text(&text),
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return Err(WsError::ConnectionClosed),
            _ => {
                return Err(WsError::Protocol(
                    "expected a handshake text frame".into(),
                ))
            }
        }
    }
}

async fn close_with_protocol_error(
    ws: &mut WebSocketStream<TcpStream>,
    reason: &'static str,
) -> WsError {
    let _ = ws
        .close(Some(CloseFrame {
            code: CloseCode::Protocol,
            reason: reason.into(),
        }))
        .await;
    WsError::Protocol(reason.into())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), WsError> {
    let mut ws = accept_async(stream).await?;

    // ── Hello ───────────────────────────────────────────────────────────
    let (client_encodings, client_features, client_id) = match next_handshake(&mut ws).await? {
        Handshake::Hello {
            encodings,
            features,
            client_id,
            ..
        } => (encodings, features, client_id),
        _ => return Err(close_with_protocol_error(&mut ws, "expected hello").await),
    };

    // ── Mirror ──────────────────────────────────────────────────────────
    let Some(encoding) = negotiate(&client_encodings, &shared.config.encodings) else {
        return Err(close_with_protocol_error(&mut ws, "no common encoding").await);
    };
    let features = feature_intersection(&client_features, &shared.config.features);
    let mirror = Handshake::Mirror {
        lri_version: LRI_VERSION.to_owned(),
        encoding,
        features,
        server_id: shared.config.server_id.clone(),
    };
    ws.send(Message::Text(mirror.to_text()?)).await?;

    // ── Bind ────────────────────────────────────────────────────────────
    let thread_id = match next_handshake(&mut ws).await? {
        // `auth` is opaque to the core; any value is accepted.
        Handshake::Bind { thread, auth: _ } => {
            thread.unwrap_or_else(|| Uuid::new_v4().to_string())
        }
        _ => return Err(close_with_protocol_error(&mut ws, "expected bind").await),
    };

    // ── Seal ────────────────────────────────────────────────────────────
    // The session is registered before Seal goes out, so a client that has
    // seen Seal can rely on the server knowing its session_id.
    let session_id = Uuid::new_v4().to_string();
    let seal = Handshake::Seal {
        session_id: session_id.clone(),
        thread: thread_id.clone(),
        status: "ready".to_owned(),
    };
    let seal_text = seal.to_text()?;
    let (mut sink, mut frames) = ws.split();
    let (outbox, mut outbox_rx) = mpsc::channel::<Message>(64);
    shared.sessions.lock().await.insert(
        session_id.clone(),
        SessionHandle {
            thread_id: thread_id.clone(),
            encoding,
            outbox: outbox.clone(),
        },
    );
    if outbox.send(Message::Text(seal_text)).await.is_err() {
        shared.sessions.lock().await.remove(&session_id);
        return Err(WsError::ConnectionClosed);
    }
    drop(outbox);
    info!(%peer, %session_id, %thread_id, %encoding, %client_id, "session sealed");

    // ── payload exchange ────────────────────────────────────────────────
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if sink.send(frame).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let result = loop {
        let Some(frame) = frames.next().await else {
            break Ok(());
        };
        match frame {
            Ok(Message::Close(_)) => break Ok(()),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(message) => match decode_payload(encoding, &message) {
                Ok(lce) => {
                    if let Some(handler) = shared.current_handler() {
                        handler(lce, &session_id, &thread_id);
                    }
                }
                // A frame that fails to decode closes the connection.
                Err(err) => {
                    warn!(%peer, %session_id, %err, "undecodable payload frame");
                    break Err(err);
                }
            },
            Err(err) => break Err(WsError::Transport(err)),
        }
    };

    shared.sessions.lock().await.remove(&session_id);
    writer.abort();
    info!(%peer, %session_id, "session closed");
    result
}
