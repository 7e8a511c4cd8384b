//! Janus video room client
//!
//! Negotiates the lecturer's publisher connection with the media server.
//! Requests that expect a reply are correlated by transaction id; plugin
//! messages are answered with an `ack` first and the real `event` later,
//! so the dispatcher keeps those transactions pending until the event
//! arrives.

use super::protocol::{
    JanusMessage, JanusRequest, JanusVerb, Jsep, TrickleCandidate, JANUS_PROTOCOL,
    VIDEOROOM_PLUGIN,
};
use super::ws::{WsConnection, WsEndpoint, WsSender};
use super::{
    ConnectionCallback, ConnectionEvent, FaultSink, IceCandidate, MediaChannel, RoomParameters, SessionDescription,
    SignalingChannel, SignalingListener,
};
use crate::config::StreamConfig;
use crate::context::{Course, SharedContext};
use crate::error::ClientFault;
use crate::failover::Reconnectable;
use crate::peer::Contact;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Client name reported to the failover monitor
pub const JANUS_CLIENT_NAME: &str = "janus";

/// Interval of session keepalives
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// How long a transaction may wait for its reply
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

struct Pending {
    wait_for_event: bool,
    reply: oneshot::Sender<JanusMessage>,
}

/// Audience member allowed to publish into the room
#[derive(Debug, Clone)]
struct Speaker {
    display_name: String,
    feed_id: Option<u64>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<String, Pending>>,
    listener: Mutex<Option<Arc<dyn SignalingListener>>>,
    local_contact: Mutex<Option<Contact>>,
    speakers: Mutex<HashMap<Uuid, Speaker>>,
    on_connection: Mutex<Option<ConnectionCallback>>,
    faults: Option<FaultSink>,
}

impl Shared {
    fn report(&self, message: String) {
        warn!("{}", message);
        if let Some(faults) = &self.faults {
            let _ = faults.send(ClientFault::handler(message));
        }
    }

    fn listener(&self) -> Option<Arc<dyn SignalingListener>> {
        self.listener.lock().clone()
    }
}

struct Active {
    connection: WsConnection,
    session_id: u64,
    handle_id: u64,
    room: Value,
    dispatcher: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Active {
    fn sender(&self) -> WsSender {
        self.connection.sender()
    }
}

/// Media-negotiation client speaking the Janus video room API
pub struct JanusClient {
    endpoint: WsEndpoint,
    stream: SharedContext,
    shared: Arc<Shared>,
    course: Mutex<Option<Course>>,
    active: tokio::sync::Mutex<Option<Active>>,
}

/// Janus rooms are numeric unless the server runs with string ids
fn room_value(course_id: &str) -> Value {
    match course_id.parse::<u64>() {
        Ok(id) => json!(id),
        Err(_) => json!(course_id),
    }
}

impl JanusClient {
    pub fn new(
        url: impl Into<String>,
        access_token: Option<String>,
        stream: SharedContext,
        faults: Option<FaultSink>,
    ) -> Self {
        Self {
            endpoint: WsEndpoint {
                name: JANUS_CLIENT_NAME.to_string(),
                url: url.into(),
                protocol: Some(JANUS_PROTOCOL.to_string()),
                access_token,
            },
            stream,
            shared: Arc::new(Shared {
                faults,
                ..Default::default()
            }),
            course: Mutex::new(None),
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &StreamConfig, stream: SharedContext, faults: Option<FaultSink>) -> Self {
        Self::new(config.janus_url(), config.access_token.clone(), stream, faults)
    }

    pub fn with_connection_callback(self, callback: ConnectionCallback) -> Self {
        *self.shared.on_connection.lock() = Some(callback);
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

    /// Contact of the local publisher, known once the room is joined
    pub fn local_contact(&self) -> Option<Contact> {
        self.shared.local_contact.lock().clone()
    }

    async fn transact(
        shared: &Shared,
        sender: &WsSender,
        request: JanusRequest,
        wait_for_event: bool,
    ) -> Result<JanusMessage> {
        let (reply, rx) = oneshot::channel();
        let transaction = request.transaction.clone();

        shared.pending.lock().insert(
            transaction.clone(),
            Pending {
                wait_for_event,
                reply,
            },
        );

        if let Err(e) = request.to_json().and_then(|text| sender.send_text(text)) {
            shared.pending.lock().remove(&transaction);
            return Err(e);
        }

        let response = match tokio::time::timeout(TRANSACTION_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Signaling(format!(
                    "Janus {:?} aborted, connection closed",
                    request.janus
                )))
            }
            Err(_) => {
                shared.pending.lock().remove(&transaction);
                return Err(Error::Timeout(format!("Janus {:?} timed out", request.janus)));
            }
        };

        if let JanusMessage::Error { error, .. } = &response {
            return Err(Error::Signaling(format!(
                "Janus {:?} failed: {} ({})",
                request.janus, error.reason, error.code
            )));
        }
        if let Some(reason) = response.room_error() {
            return Err(Error::Signaling(format!("Video room request failed: {}", reason)));
        }

        Ok(response)
    }

    /// Send a plugin message on the attached handle
    async fn room_request(&self, body: Value) -> Result<JanusMessage> {
        let (sender, session_id, handle_id) = self.handles().await?;
        let request = JanusRequest::new(JanusVerb::Message)
            .session(session_id)
            .handle(handle_id)
            .body(body);

        Self::transact(&self.shared, &sender, request, false).await
    }

    /// Queue a request without waiting for the reply
    async fn post(&self, request: impl FnOnce(u64, u64) -> JanusRequest) -> Result<()> {
        let (sender, session_id, handle_id) = self.handles().await?;
        sender.send_text(request(session_id, handle_id).to_json()?)
    }

    async fn handles(&self) -> Result<(WsSender, u64, u64)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| (a.sender(), a.session_id, a.handle_id))
            .ok_or_else(|| Error::Signaling("Janus client is not connected".to_string()))
    }

    async fn room(&self) -> Result<Value> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.room.clone())
            .ok_or_else(|| Error::Signaling("Janus client is not connected".to_string()))
    }

    async fn kick(&self, feed_id: u64) -> Result<()> {
        let room = self.room().await?;
        self.room_request(json!({ "request": "kick", "room": room, "id": feed_id }))
            .await?;
        Ok(())
    }

    async fn set_publisher_limit(&self, publishers: u32) -> Result<()> {
        let room = self.room().await?;
        self.room_request(json!({
            "request": "edit",
            "room": room,
            "new_publishers": publishers,
        }))
        .await?;
        Ok(())
    }

    async fn dispatch(shared: Arc<Shared>, mut inbound: mpsc::UnboundedReceiver<String>) {
        while let Some(text) = inbound.recv().await {
            let message = match JanusMessage::from_json(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to handle Janus message: {}", e);
                    continue;
                }
            };

            if let Some(transaction) = message.transaction() {
                let mut pending = shared.pending.lock();
                let waiting_ack = matches!(message, JanusMessage::Ack { .. })
                    && pending
                        .get(transaction)
                        .is_some_and(|p| p.wait_for_event);

                if !waiting_ack {
                    if let Some(p) = pending.remove(transaction) {
                        let _ = p.reply.send(message);
                        continue;
                    }
                }
            }

            Self::handle_event(&shared, message);
        }

        // Fail every request still waiting for a reply.
        shared.pending.lock().clear();
        debug!("Janus dispatcher terminated");
    }

    fn handle_event(shared: &Shared, message: JanusMessage) {
        if let Some(reason) = message.room_error() {
            shared.report(format!("Video room error: {}", reason));
            return;
        }

        match message {
            JanusMessage::Event { ref jsep, .. } => {
                Self::update_speakers(shared, &message);

                if let Some(jsep) = jsep.clone() {
                    let contact = shared.local_contact.lock().clone();
                    match (shared.listener(), contact) {
                        (Some(listener), Some(contact)) => {
                            listener.on_remote_session_description(contact, jsep.into())
                        }
                        _ => warn!("Dropping remote session description, room not joined"),
                    }
                }
            }
            JanusMessage::Trickle {
                candidate: TrickleCandidate::Candidate(candidate),
                ..
            } => {
                let contact = shared.local_contact.lock().clone();
                if let (Some(listener), Some(contact)) = (shared.listener(), contact) {
                    listener.on_remote_ice_candidate(contact, candidate);
                }
            }
            JanusMessage::Trickle { .. } => debug!("Remote ICE gathering completed"),
            JanusMessage::WebRtcUp { sender } => info!("Media path up for handle {:?}", sender),
            JanusMessage::Media {
                media_type,
                receiving,
                ..
            } => debug!("Media server receiving {:?}: {:?}", media_type, receiving),
            JanusMessage::Hangup { reason, .. } => {
                let reason = format!(
                    "Media server hung up: {}",
                    reason.unwrap_or_else(|| "no reason".to_string())
                );
                // The publisher connection is gone; recovery rejoins the room.
                let on_connection = shared.on_connection.lock().clone();
                match on_connection {
                    Some(cb) => {
                        warn!("{}", reason);
                        cb(JANUS_CLIENT_NAME, ConnectionEvent::Failed(reason));
                    }
                    None => shared.report(reason),
                }
            }
            JanusMessage::Error { error, .. } => {
                shared.report(format!("Janus error: {} ({})", error.reason, error.code));
            }
            JanusMessage::Timeout { session_id } => {
                shared.report(format!("Janus session {:?} timed out", session_id));
            }
            JanusMessage::Success { .. } | JanusMessage::Ack { .. } | JanusMessage::Unknown => {}
        }
    }

    /// Track feed ids of audience members allowed to speak
    fn update_speakers(shared: &Shared, message: &JanusMessage) {
        let mut speakers = shared.speakers.lock();

        for publisher in message.publishers() {
            if let Some(speaker) = speakers
                .values_mut()
                .find(|s| s.feed_id.is_none() && s.display_name == publisher.display)
            {
                debug!("Speaker {} publishes as feed {}", publisher.display, publisher.id);
                speaker.feed_id = Some(publisher.id);
            }
        }

        if let Some(feed_id) = message.departed_feed() {
            speakers.retain(|_, s| s.feed_id != Some(feed_id));
        }
    }

    async fn keepalive(sender: WsSender, session_id: u64) {
        let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        interval.tick().await;

        loop {
            interval.tick().await;

            let request = JanusRequest::new(JanusVerb::Keepalive).session(session_id);
            if let Err(e) = request.to_json().and_then(|text| sender.send_text(text)) {
                debug!("Stopping Janus keepalive: {}", e);
                break;
            }
        }
    }

    async fn close_active(&self) {
        if let Some(active) = self.active.lock().await.take() {
            let destroy = JanusRequest::new(JanusVerb::Destroy).session(active.session_id);
            if let Err(e) = destroy.to_json().and_then(|text| active.sender().send_text(text)) {
                debug!("Failed to destroy Janus session: {}", e);
            }

            active.keepalive.abort();
            active.dispatcher.abort();
            active.connection.close().await;
        }
        self.shared.pending.lock().clear();
        self.shared.local_contact.lock().take();
    }

    /// Replace any active session with a fresh join of `course`
    async fn open(&self, course: &Course) -> Result<RoomParameters> {
        self.close_active().await;
        *self.course.lock() = Some(course.clone());
        self.join(course).await
    }

    #[instrument(skip(self, course), fields(course = %course.id))]
    async fn join(&self, course: &Course) -> Result<RoomParameters> {
        let on_connection = self.shared.on_connection.lock().clone();
        let (connection, inbound) = WsConnection::connect(&self.endpoint, on_connection).await?;
        let sender = connection.sender();
        let dispatcher = tokio::spawn(Self::dispatch(self.shared.clone(), inbound));

        let setup = async {
            let created =
                Self::transact(&self.shared, &sender, JanusRequest::new(JanusVerb::Create), false)
                    .await?;
            let session_id = created
                .data_id()
                .ok_or_else(|| Error::Signaling("Janus create returned no session".to_string()))?;

            let attached = Self::transact(
                &self.shared,
                &sender,
                JanusRequest::new(JanusVerb::Attach)
                    .session(session_id)
                    .plugin(VIDEOROOM_PLUGIN),
                false,
            )
            .await?;
            let handle_id = attached
                .data_id()
                .ok_or_else(|| Error::Signaling("Janus attach returned no handle".to_string()))?;

            let room = room_value(&course.id);
            let joined = Self::transact(
                &self.shared,
                &sender,
                JanusRequest::new(JanusVerb::Message)
                    .session(session_id)
                    .handle(handle_id)
                    .body(json!({
                        "request": "join",
                        "ptype": "publisher",
                        "room": room,
                        "display": course.title,
                    })),
                true,
            )
            .await?;
            let participant_id = joined
                .room_data()
                .and_then(|data| data.get("id"))
                .and_then(|id| id.as_u64())
                .ok_or_else(|| Error::Signaling("Join returned no participant id".to_string()))?;

            Ok::<_, Error>((session_id, handle_id, room, participant_id))
        };

        let (session_id, handle_id, room, participant_id) = match setup.await {
            Ok(ids) => ids,
            Err(e) => {
                dispatcher.abort();
                connection.close().await;
                return Err(e);
            }
        };

        info!(
            "Joined room {} as participant {} (session {})",
            course.id, participant_id, session_id
        );

        let params = RoomParameters {
            participant_id,
            display_name: course.title.clone(),
            initiator: true,
            ice_servers: self.stream.read().ice_servers.clone(),
        };
        *self.shared.local_contact.lock() = Some(Contact::new(
            participant_id.to_string(),
            params.display_name.clone(),
        ));

        let keepalive = tokio::spawn(Self::keepalive(sender, session_id));
        *self.active.lock().await = Some(Active {
            connection,
            session_id,
            handle_id,
            room,
            dispatcher,
            keepalive,
        });

        Ok(params)
    }
}

#[async_trait]
impl SignalingChannel for JanusClient {
    async fn send_session_description(
        &self,
        contact: &Contact,
        description: SessionDescription,
    ) -> Result<()> {
        debug!("Sending {:?} for {}", description.sdp_type, contact);

        let body = if description.is_offer() {
            let stream = self.stream.read();
            json!({
                "request": "configure",
                "audio": stream.audio.send_audio,
                "video": stream.video.send_video || stream.screen.send_screen,
            })
        } else {
            json!({ "request": "start" })
        };
        let jsep = Jsep::from(description);

        // Replies arrive as events and are handled by the dispatcher.
        self.post(|session_id, handle_id| {
            JanusRequest::new(JanusVerb::Message)
                .session(session_id)
                .handle(handle_id)
                .body(body)
                .jsep(jsep)
        })
        .await
    }

    async fn send_ice_candidate(&self, _contact: &Contact, candidate: IceCandidate) -> Result<()> {
        self.post(|session_id, handle_id| {
            JanusRequest::new(JanusVerb::Trickle)
                .session(session_id)
                .handle(handle_id)
                .candidate(TrickleCandidate::Candidate(candidate))
        })
        .await
    }

    async fn join_room(&self, as_contact: &Contact, room: &str) -> Result<RoomParameters> {
        self.open(&Course::new(room, as_contact.name.clone())).await
    }

    async fn leave_room(&self) -> Result<()> {
        self.post(|session_id, handle_id| {
            JanusRequest::new(JanusVerb::Message)
                .session(session_id)
                .handle(handle_id)
                .body(json!({ "request": "leave" }))
        })
        .await
    }
}

#[async_trait]
impl MediaChannel for JanusClient {
    fn set_listener(&self, listener: Arc<dyn SignalingListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    async fn connect(&self, course: &Course) -> Result<()> {
        let params = self.open(course).await?;

        match self.shared.listener() {
            Some(listener) => listener.on_room_joined(params).await,
            None => {
                warn!("Joined room without a signaling listener");
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.close_active().await;
        self.shared.speakers.lock().clear();
        info!("Disconnected {} client", JANUS_CLIENT_NAME);
        Ok(())
    }

    async fn start_remote_speech(&self, request_id: Uuid, user_name: &str) -> Result<()> {
        // Only one audience member speaks at a time.
        let previous: Vec<Speaker> = self.shared.speakers.lock().drain().map(|(_, s)| s).collect();
        for feed_id in previous.iter().filter_map(|s| s.feed_id) {
            if let Err(e) = self.kick(feed_id).await {
                warn!("Stop previous speech failed: {}", e);
            }
        }

        self.shared.speakers.lock().insert(
            request_id,
            Speaker {
                display_name: user_name.to_string(),
                feed_id: None,
            },
        );

        self.set_publisher_limit(2).await
    }

    async fn stop_remote_speech(&self, peer_id: u64) -> Result<()> {
        self.shared
            .speakers
            .lock()
            .retain(|_, s| s.feed_id != Some(peer_id));

        self.set_publisher_limit(1).await?;
        self.kick(peer_id).await
    }
}

#[async_trait]
impl Reconnectable for JanusClient {
    fn name(&self) -> &str {
        JANUS_CLIENT_NAME
    }

    async fn reconnect(&self) -> Result<()> {
        let course = self.course.lock().clone().ok_or(Error::MissingCourse)?;
        MediaChannel::connect(self, &course).await
    }
}
