//! WebSocket plumbing shared by the signaling clients
//!
//! A [`WsConnection`] owns a split WebSocket: a sender task drains an
//! unbounded channel of outgoing frames and a receiver task forwards text
//! frames to the owning client and reports connection loss.

use super::{ConnectionCallback, ConnectionEvent};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters of one signaling endpoint
#[derive(Debug, Clone)]
pub struct WsEndpoint {
    /// Client name used in logs and connection callbacks
    pub name: String,

    /// Resolved ws:// or wss:// URL
    pub url: String,

    /// Value of the `Sec-WebSocket-Protocol` header
    pub protocol: Option<String>,

    /// Bearer token sent in the `Authorization` header
    pub access_token: Option<String>,
}

/// Cloneable handle for queueing outgoing text frames
#[derive(Debug, Clone)]
pub struct WsSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsSender {
    pub fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(Message::Text(text))
            .map_err(|e| Error::WebSocket(format!("Failed to send message: {}", e)))
    }
}

/// An open WebSocket with its sender and receiver tasks
pub struct WsConnection {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
    closing: Arc<AtomicBool>,
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl WsConnection {
    /// Open the WebSocket.
    ///
    /// Incoming text frames are delivered on the returned receiver. Loss of
    /// the connection is reported through `on_connection` unless it was
    /// closed locally.
    pub async fn connect(
        endpoint: &WsEndpoint,
        on_connection: Option<ConnectionCallback>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        info!("Connecting {} client to {}", endpoint.name, endpoint.url);

        let mut request = endpoint.url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        if let Some(protocol) = &endpoint.protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| Error::InvalidConfig(format!("Invalid subprotocol: {}", e)))?;
            headers.insert("Sec-WebSocket-Protocol", value);
        }
        if let Some(token) = &endpoint.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::InvalidConfig(format!("Invalid access token: {}", e)))?;
            headers.insert("Authorization", value);
        }

        let (ws_stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| {
                Error::Timeout(format!("Connecting to {} timed out", endpoint.url))
            })??;

        info!("Connected {} client", endpoint.name);

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));

        let sender = tokio::spawn(Self::sender_task(endpoint.name.clone(), write, rx));
        let receiver = tokio::spawn(Self::receiver_task(
            endpoint.name.clone(),
            read,
            inbound_tx,
            tx.clone(),
            closing.clone(),
            on_connection.clone(),
        ));

        if let Some(cb) = &on_connection {
            cb(&endpoint.name, ConnectionEvent::Connected);
        }

        Ok((
            Self {
                name: endpoint.name.clone(),
                tx,
                closing,
                sender,
                receiver,
            },
            inbound_rx,
        ))
    }

    /// Queue a text frame
    pub fn send_text(&self, text: String) -> Result<()> {
        self.sender().send_text(text)
    }

    pub fn sender(&self) -> WsSender {
        WsSender {
            tx: self.tx.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::SeqCst) && !self.receiver.is_finished()
    }

    /// Close the WebSocket without reporting a connection loss
    pub async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);

        if self.tx.send(Message::Close(None)).is_ok() {
            // Give the sender task a moment to flush the close frame.
            let _ = tokio::time::timeout(Duration::from_secs(1), self.sender).await;
        } else {
            self.sender.abort();
        }
        self.receiver.abort();

        debug!("Closed {} client", self.name);
    }

    async fn sender_task(
        name: String,
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));

            if let Err(e) = write.send(msg).await {
                error!("Failed to send {} WebSocket message: {}", name, e);
                break;
            }
            if is_close {
                break;
            }
        }

        debug!("{} sender task terminated", name);
    }

    async fn receiver_task(
        name: String,
        mut read: futures::stream::SplitStream<WsStream>,
        inbound: mpsc::UnboundedSender<String>,
        outgoing: mpsc::UnboundedSender<Message>,
        closing: Arc<AtomicBool>,
        on_connection: Option<ConnectionCallback>,
    ) {
        let mut failure = None;

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if inbound.send(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = outgoing.send(Message::Pong(data));
                }
                Ok(Message::Close(frame)) => {
                    info!("{} WebSocket closed by server: {:?}", name, frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{} WebSocket error: {}", name, e);
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if !closing.load(Ordering::SeqCst) {
            if let Some(cb) = &on_connection {
                let event = match failure {
                    Some(reason) => ConnectionEvent::Failed(reason),
                    None => ConnectionEvent::Closed,
                };
                cb(&name, event);
            }
        }

        debug!("{} receiver task terminated", name);
    }
}
