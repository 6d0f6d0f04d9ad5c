// SPDX-License-Identifier: Apache-2.0
//! LHS WebSocket client.

use futures_util::{SinkExt, StreamExt};
use lri_envelope::Lce;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::info;
use uuid::Uuid;

use crate::protocol::{default_features, Encoding, Handshake, LRI_VERSION};
use crate::{decode_payload, encode_payload, WsError};

struct Connection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_id: String,
    thread: String,
    encoding: Encoding,
}

/// LHS WebSocket client.
///
/// [`connect`](WsClient::connect) runs Hello→Seal and records the sealed
/// `session_id` and negotiated encoding; `send`, `receive`, and `listen`
/// before that fail with [`WsError::NotConnected`].
pub struct WsClient {
    url: String,
    encodings: Vec<Encoding>,
    features: Vec<String>,
    thread_id: Option<String>,
    auth: Option<serde_json::Value>,
    client_id: String,
    conn: Option<Connection>,
}

impl WsClient {
    /// Client for `url` (a `ws://` endpoint) with default preferences:
    /// `json` then `cbor`, the standard feature set, an anonymous thread.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            encodings: vec![Encoding::Json, Encoding::Cbor],
            features: default_features(),
            thread_id: None,
            auth: None,
            client_id: format!("lri-client-{}", Uuid::new_v4()),
            conn: None,
        }
    }

    /// Encoding preference order offered in Hello.
    pub fn with_encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.encodings = encodings;
        self
    }

    /// Advisory features offered in Hello.
    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    /// Thread to bind; omit for a server-assigned anonymous thread.
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread_id = Some(thread.into());
        self
    }

    /// Opaque credential carried in Bind.
    pub fn with_auth(mut self, auth: serde_json::Value) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Identifier sent in Hello.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// The sealed session id, once connected.
    pub fn session_id(&self) -> Option<&str> {
        self.conn.as_ref().map(|c| c.session_id.as_str())
    }

    /// The bound thread, once connected (server-assigned when none was
    /// requested).
    pub fn thread(&self) -> Option<&str> {
        self.conn.as_ref().map(|c| c.thread.as_str())
    }

    /// The encoding the server selected, once connected.
    pub fn negotiated_encoding(&self) -> Option<Encoding> {
        self.conn.as_ref().map(|c| c.encoding)
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Dial the server and run the Hello→Seal handshake.
    ///
    /// # Errors
    ///
    /// Transport failures from the dial, or [`WsError::Protocol`] when the
    /// server answers out of step.
    pub async fn connect(&mut self) -> Result<(), WsError> {
        let (mut stream, _) = connect_async(self.url.as_str()).await?;

        let hello = Handshake::Hello {
            lri_version: LRI_VERSION.to_owned(),
            encodings: self.encodings.clone(),
            features: self.features.clone(),
            client_id: self.client_id.clone(),
        };
        stream.send(Message::Text(hello.to_text()?)).await?;

        let encoding = match next_handshake(&mut stream).await? {
            Handshake::Mirror { encoding, .. } => encoding,
            _ => return Err(WsError::Protocol("expected mirror".into())),
        };

        let bind = Handshake::Bind {
            thread: self.thread_id.clone(),
            auth: self.auth.clone(),
        };
        stream.send(Message::Text(bind.to_text()?)).await?;

        let (session_id, thread) = match next_handshake(&mut stream).await? {
            Handshake::Seal {
                session_id,
                thread,
                status,
            } if status == "ready" => (session_id, thread),
            Handshake::Seal { status, .. } => {
                return Err(WsError::Protocol(format!("seal status {status}")));
            }
            _ => return Err(WsError::Protocol("expected seal".into())),
        };

        info!(url = %self.url, %session_id, %thread, %encoding, "handshake sealed");
        self.conn = Some(Connection {
            stream,
            session_id,
            thread,
            encoding,
        });
        Ok(())
    }

    /// Encode and send one envelope.
    ///
    /// # Errors
    ///
    /// [`WsError::NotConnected`] before [`connect`](WsClient::connect);
    /// codec or transport failures otherwise.
    pub async fn send(&mut self, lce: &Lce) -> Result<(), WsError> {
        let conn = self.conn.as_mut().ok_or(WsError::NotConnected)?;
        let frame = encode_payload(conn.encoding, lce)?;
        conn.stream.send(frame).await?;
        Ok(())
    }

    /// Wait for the next inbound envelope.
    ///
    /// # Errors
    ///
    /// [`WsError::NotConnected`] before connect,
    /// [`WsError::ConnectionClosed`] when the socket closes, protocol or
    /// codec failures otherwise.
    pub async fn receive(&mut self) -> Result<Lce, WsError> {
        let conn = self.conn.as_mut().ok_or(WsError::NotConnected)?;
        loop {
            let Some(frame) = conn.stream.next().await else {
                return Err(WsError::ConnectionClosed);
            };
            match frame? {
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return Err(WsError::ConnectionClosed),
                message => return decode_payload(conn.encoding, &message),
            }
        }
    }

    /// Consume inbound envelopes until the socket closes, invoking
    /// `on_message` for each. Returns `Ok(())` on a clean close. Dropping
    /// the returned future (cancellation) leaves the connection owned and
    /// closable — the socket is not leaked.
    ///
    /// # Errors
    ///
    /// As for [`receive`](WsClient::receive), except a clean close is not
    /// an error.
    pub async fn listen(&mut self, mut on_message: impl FnMut(Lce)) -> Result<(), WsError> {
        if self.conn.is_none() {
            return Err(WsError::NotConnected);
        }
        loop {
            match self.receive().await {
                Ok(lce) => on_message(lce),
                Err(WsError::ConnectionClosed) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Send a close frame and drop the connection. A no-op when not
    /// connected.
    ///
    /// # Errors
    ///
    /// Never fails today; the close is best-effort.
    pub async fn close(&mut self) -> Result<(), WsError> {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.stream.close(None).await;
        }
        Ok(())
    }
}

async fn next_handshake(
    stream: &mut WebSocketStream<MaybeTlsStream<TcpStream>>,
) -> Result<Handshake, WsError> {
    loop {
        let Some(frame) = stream.next().await else {
            return Err(WsError::ConnectionClosed);
        };
        match frame? {
            Message::Text(text) => return Handshake::from_text(&text),
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return Err(WsError::ConnectionClosed),
            _ => return Err(WsError::Protocol("expected a handshake text frame".into())),
        }
    }
}
