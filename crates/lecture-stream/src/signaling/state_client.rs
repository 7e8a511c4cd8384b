//! Session-state channel client

use super::protocol::{StateMessage, STATE_PROTOCOL};
use super::ws::{WsConnection, WsEndpoint, WsSender};
use super::{ConnectionCallback, StateChannel};
use crate::action::{ActionConsumer, PlaybackAction};
use crate::config::StreamConfig;
use crate::failover::Reconnectable;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client name reported to the failover monitor
pub const STATE_CLIENT_NAME: &str = "stream-state";

struct Active {
    connection: WsConnection,
    dispatcher: JoinHandle<()>,
}

/// Forwards recorded playback actions to the session-state WebSocket
pub struct StreamStateClient {
    endpoint: WsEndpoint,
    on_connection: Option<ConnectionCallback>,
    active: Mutex<Option<Active>>,
}

impl StreamStateClient {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            endpoint: WsEndpoint {
                name: STATE_CLIENT_NAME.to_string(),
                url: url.into(),
                protocol: Some(STATE_PROTOCOL.to_string()),
                access_token,
            },
            on_connection: None,
            active: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.state_url(), config.access_token.clone())
    }

    /// Report connection changes, e.g. to the failover monitor
    pub fn with_connection_callback(mut self, callback: ConnectionCallback) -> Self {
        self.on_connection = Some(callback);
        self
    }

    pub async fn is_connected(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.connection.is_open())
            .unwrap_or(false)
    }

    async fn dispatch(mut inbound: mpsc::UnboundedReceiver<String>, reply: WsSender) {
        while let Some(text) = inbound.recv().await {
            match StateMessage::from_json(&text) {
                Ok(StateMessage::Ping) => {
                    if let Err(e) = StateMessage::Pong
                        .to_json()
                        .and_then(|pong| reply.send_text(pong))
                    {
                        warn!("Failed to answer state ping: {}", e);
                    }
                }
                Ok(msg) => debug!("Ignoring state message: {:?}", msg),
                Err(e) => warn!("Failed to handle state message: {}", e),
            }
        }
    }
}

#[async_trait]
impl StateChannel for StreamStateClient {
    async fn connect(&self) -> Result<()> {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            previous.dispatcher.abort();
            previous.connection.close().await;
        }

        let (connection, inbound) =
            WsConnection::connect(&self.endpoint, self.on_connection.clone()).await?;

        let dispatcher = tokio::spawn(Self::dispatch(inbound, connection.sender()));

        *active = Some(Active {
            connection,
            dispatcher,
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(active) = self.active.lock().await.take() {
            active.dispatcher.abort();
            active.connection.close().await;
            info!("Disconnected {} client", STATE_CLIENT_NAME);
        }
        Ok(())
    }
}

#[async_trait]
impl ActionConsumer for StreamStateClient {
    async fn consume(&self, action: PlaybackAction) -> Result<()> {
        let text = StateMessage::Action { action }.to_json()?;

        match self.active.lock().await.as_ref() {
            Some(active) => active.connection.send_text(text),
            None => Err(Error::WebSocket(format!(
                "{} client is not connected",
                STATE_CLIENT_NAME
            ))),
        }
    }
}

#[async_trait]
impl Reconnectable for StreamStateClient {
    fn name(&self) -> &str {
        STATE_CLIENT_NAME
    }

    async fn reconnect(&self) -> Result<()> {
        StateChannel::connect(self).await
    }
}
