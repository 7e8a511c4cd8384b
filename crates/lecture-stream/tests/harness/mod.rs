//! Test harness for stream session integration tests
//!
//! Provides in-memory stand-ins for every seam of the session:
//! - documents, uploads and speech requests
//! - session-state and media signaling clients
//! - peer connections created by a recording factory
//!
//! Each fake logs what it was asked to do so tests can assert on order.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use lecture_stream::action::{ActionConsumer, PlaybackAction};
use lecture_stream::context::Course;
use lecture_stream::controller::{ClientContext, ClientFactory, SessionClients};
use lecture_stream::document::{Document, DocumentSource};
use lecture_stream::failover::Reconnectable;
use lecture_stream::peer::{Contact, PeerConnectionClient, PeerConnectionContext, PeerConnectionFactory};
use lecture_stream::rest::{DocumentUploader, SpeechService};
use lecture_stream::signaling::{
    FaultSink, IceCandidate, MediaChannel, RoomParameters, SessionDescription, SignalingChannel,
    SignalingListener, StateChannel,
};
use lecture_stream::{Error, Result, SessionEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Shared, ordered log of calls made on the fakes
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }
}

/// Open documents of the host application
pub struct FakeDocuments {
    open: Mutex<Vec<Document>>,
    selected: Mutex<Option<Uuid>>,
}

impl FakeDocuments {
    pub fn new(open: Vec<Document>) -> Arc<Self> {
        let selected = open.first().map(|d| d.id);
        Arc::new(Self {
            open: Mutex::new(open),
            selected: Mutex::new(selected),
        })
    }

    pub fn select(&self, document: &Document) {
        *self.selected.lock() = Some(document.id);
    }

    pub fn replace(&self, old: &Document, new: Document) {
        let mut open = self.open.lock();
        if let Some(slot) = open.iter_mut().find(|d| d.id == old.id) {
            *slot = new;
        }
    }
}

impl DocumentSource for FakeDocuments {
    fn documents(&self) -> Vec<Document> {
        self.open.lock().clone()
    }

    fn selected(&self) -> Option<Document> {
        let selected = (*self.selected.lock())?;
        self.open.lock().iter().find(|d| d.id == selected).cloned()
    }

    fn serialize(&self, document: &Document) -> Result<Bytes> {
        Ok(Bytes::from(format!("%PDF {}", document.name)))
    }

    fn whiteboard_template(&self, document: &Document, pages: u32) -> Result<Document> {
        let mut template = document.clone();
        template.page_count = pages;
        Ok(template)
    }
}

/// Uploader returning `remote/<file name>`
#[derive(Default)]
pub struct FakeUploader {
    pub uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl DocumentUploader for FakeUploader {
    async fn upload_file(&self, file_name: &str, _data: Bytes) -> Result<String> {
        self.uploads.lock().push(file_name.to_string());
        Ok(format!("remote/{}", file_name))
    }
}

/// Collects every forwarded playback action
#[derive(Default)]
pub struct ActionSink {
    pub actions: Mutex<Vec<PlaybackAction>>,
}

impl ActionSink {
    pub fn actions(&self) -> Vec<PlaybackAction> {
        self.actions.lock().clone()
    }

    pub fn clear(&self) {
        self.actions.lock().clear();
    }
}

#[async_trait]
impl ActionConsumer for ActionSink {
    async fn consume(&self, action: PlaybackAction) -> Result<()> {
        self.actions.lock().push(action);
        Ok(())
    }
}

/// Session-state client that records actions instead of sending them
pub struct FakeStateClient {
    pub log: CallLog,
    pub sink: ActionSink,
    pub fail_connect: AtomicBool,
}

impl FakeStateClient {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            sink: ActionSink::default(),
            fail_connect: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StateChannel for FakeStateClient {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Network("state server unreachable".to_string()));
        }
        self.log.push("state:connect");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.push("state:disconnect");
        Ok(())
    }
}

#[async_trait]
impl ActionConsumer for FakeStateClient {
    async fn consume(&self, action: PlaybackAction) -> Result<()> {
        self.sink.consume(action).await
    }
}

#[async_trait]
impl Reconnectable for FakeStateClient {
    fn name(&self) -> &str {
        "stream-state"
    }

    async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }
}

/// Media room client; joining calls back into the peer manager as initiator
pub struct FakeMediaClient {
    pub log: CallLog,
    pub participant_id: u64,
    pub fail_connect: AtomicBool,
    listener: Mutex<Option<Arc<dyn SignalingListener>>>,
}

impl FakeMediaClient {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            participant_id: 1001,
            fail_connect: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    pub fn local_contact(&self, course: &Course) -> Contact {
        Contact::new(self.participant_id.to_string(), course.title.clone())
    }
}

#[async_trait]
impl MediaChannel for FakeMediaClient {
    fn set_listener(&self, listener: Arc<dyn SignalingListener>) {
        *self.listener.lock() = Some(listener);
    }

    async fn connect(&self, course: &Course) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Signaling("room does not exist".to_string()));
        }
        self.log.push(format!("media:connect:{}", course.id));

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener
                .on_room_joined(RoomParameters {
                    participant_id: self.participant_id,
                    display_name: course.title.clone(),
                    initiator: true,
                    ice_servers: vec![],
                })
                .await?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.push("media:disconnect");
        Ok(())
    }

    async fn start_remote_speech(&self, request_id: Uuid, user_name: &str) -> Result<()> {
        self.log
            .push(format!("media:speech:start:{}:{}", request_id, user_name));
        Ok(())
    }

    async fn stop_remote_speech(&self, peer_id: u64) -> Result<()> {
        self.log.push(format!("media:speech:stop:{}", peer_id));
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for FakeMediaClient {
    async fn send_session_description(
        &self,
        contact: &Contact,
        description: SessionDescription,
    ) -> Result<()> {
        self.log
            .push(format!("media:sdp:{}:{:?}", contact.id, description.sdp_type));
        Ok(())
    }

    async fn send_ice_candidate(&self, contact: &Contact, _candidate: IceCandidate) -> Result<()> {
        self.log.push(format!("media:ice:{}", contact.id));
        Ok(())
    }

    async fn join_room(&self, as_contact: &Contact, room: &str) -> Result<RoomParameters> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Signaling("room does not exist".to_string()));
        }
        self.log.push(format!("media:join:{}:{}", room, as_contact.name));

        Ok(RoomParameters {
            participant_id: self.participant_id,
            display_name: as_contact.name.clone(),
            initiator: true,
            ice_servers: vec![],
        })
    }

    async fn leave_room(&self) -> Result<()> {
        self.log.push("media:leave");
        Ok(())
    }
}

#[async_trait]
impl Reconnectable for FakeMediaClient {
    fn name(&self) -> &str {
        "janus"
    }

    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Hands out the same fake clients on every start and keeps the fault sink
pub struct FakeClientFactory {
    pub state: Arc<FakeStateClient>,
    pub media: Arc<FakeMediaClient>,
    pub creates: AtomicUsize,
    faults: Mutex<Option<FaultSink>>,
}

impl FakeClientFactory {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            state: FakeStateClient::new(log.clone()),
            media: FakeMediaClient::new(log),
            creates: AtomicUsize::new(0),
            faults: Mutex::new(None),
        })
    }

    /// Fault sink of the most recent session
    pub fn faults(&self) -> FaultSink {
        self.faults
            .lock()
            .clone()
            .expect("no session has been started")
    }
}

impl ClientFactory for FakeClientFactory {
    fn create(&self, ctx: ClientContext<'_>) -> Result<SessionClients> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        *self.faults.lock() = Some(ctx.faults);

        Ok(SessionClients {
            state: self.state.clone(),
            media: self.media.clone(),
            signaling: self.media.clone(),
            actions: self.state.clone(),
            reconnect_targets: vec![
                self.state.clone() as Arc<dyn Reconnectable>,
                self.media.clone() as Arc<dyn Reconnectable>,
            ],
        })
    }
}

/// Peer connection that only logs
pub struct FakePeer {
    contact: Contact,
    log: CallLog,
    fail_close: bool,
}

#[async_trait]
impl PeerConnectionClient for FakePeer {
    fn contact(&self) -> &Contact {
        &self.contact
    }

    async fn init_call(&self, with_video: bool) -> Result<()> {
        self.log
            .push(format!("peer:{}:offer:video={}", self.contact.id, with_video));
        Ok(())
    }

    async fn set_session_description(&self, description: SessionDescription) -> Result<()> {
        self.log
            .push(format!("peer:{}:sdp:{:?}", self.contact.id, description.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        Ok(())
    }

    async fn remove_ice_candidates(&self, _candidates: Vec<IceCandidate>) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, _data: Bytes) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.push(format!("peer:{}:close", self.contact.id));
        if self.fail_close {
            return Err(Error::PeerConnection("DTLS transport already closed".to_string()));
        }
        Ok(())
    }

    fn has_local_stream(&self) -> bool {
        true
    }

    fn has_remote_stream(&self) -> bool {
        false
    }
}

/// Creates [`FakePeer`]s; contacts listed in `fail_close` fail to close
#[derive(Default)]
pub struct FakePeerFactory {
    pub log: CallLog,
    pub fail_close: Mutex<Vec<String>>,
}

impl FakePeerFactory {
    pub fn new(log: CallLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            fail_close: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, ctx: PeerConnectionContext) -> Result<Arc<dyn PeerConnectionClient>> {
        self.log.push(format!("peer:{}:create", ctx.contact.id));
        let fail_close = self.fail_close.lock().contains(&ctx.contact.id);

        Ok(Arc::new(FakePeer {
            contact: ctx.contact,
            log: self.log.clone(),
            fail_close,
        }))
    }
}

/// Speech request and recording flag endpoint
#[derive(Default)]
pub struct FakeSpeech {
    pub log: CallLog,
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn accept_speech_request(&self, request_id: Uuid) -> Result<()> {
        self.log.push(format!("speech:accept:{}", request_id));
        Ok(())
    }

    async fn reject_speech_request(&self, request_id: Uuid) -> Result<()> {
        self.log.push(format!("speech:reject:{}", request_id));
        Ok(())
    }

    async fn set_recording(&self, course_id: &str, recording: bool) -> Result<()> {
        self.log
            .push(format!("speech:recording:{}:{}", course_id, recording));
        Ok(())
    }
}

/// Wait for the first event matching `predicate`
pub async fn wait_for_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    predicate: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
