//! Stream session controller
//!
//! [`StreamSessionController`] is the single authority over the stream,
//! camera and screen-share facets. It builds the [`StreamContext`] on start,
//! wires the signaling clients, peer manager, recorder and failover monitor
//! together and tears them down again in dependency order on stop.
//!
//! Faults raised asynchronously by the clients arrive on a [`FaultSink`]
//! channel. Handler faults demote the stream and camera facets to `Error`;
//! media faults are republished as [`SessionEvent::MediaError`].

use crate::action::ActionConsumer;
use crate::config::{ScreenShareProfile, StreamConfig, VideoCaptureCapability};
use crate::context::{Course, ScreenSource, SharedContext, StreamContext};
use crate::document::DocumentSource;
use crate::error::FaultKind;
use crate::events::{EventBus, SessionEvent};
use crate::failover::{FailoverMonitor, Reconnectable, ReconnectionPolicy};
use crate::media::{AudioFrameProcessor, AudioSink};
use crate::peer::{PeerConnectionFactory, PeerConnectionManager, RtcPeerConnectionFactory};
use crate::recorder::EventRecorder;
use crate::rest::{DocumentUploader, SpeechService, StreamRestClient};
use crate::signaling::{
    ConnectionCallback, ConnectionEvent, FaultSink, JanusClient, MediaChannel, SignalingChannel,
    StateChannel, StreamStateClient,
};
use crate::state::{Executable, ExecutableState, FacetState};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Clients of one running session
#[derive(Clone)]
pub struct SessionClients {
    pub state: Arc<dyn StateChannel>,
    pub media: Arc<dyn MediaChannel>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub actions: Arc<dyn ActionConsumer>,
    pub reconnect_targets: Vec<Arc<dyn Reconnectable>>,
}

/// Inputs for building the clients of a session
pub struct ClientContext<'a> {
    pub config: &'a StreamConfig,
    pub stream: SharedContext,
    pub faults: FaultSink,
    pub on_connection: ConnectionCallback,
}

/// Creates the signaling clients on every fresh start
pub trait ClientFactory: Send + Sync {
    fn create(&self, ctx: ClientContext<'_>) -> Result<SessionClients>;
}

/// Session-state and Janus WebSocket clients
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketClientFactory;

impl ClientFactory for WebSocketClientFactory {
    fn create(&self, ctx: ClientContext<'_>) -> Result<SessionClients> {
        let state = Arc::new(
            StreamStateClient::from_config(ctx.config)
                .with_connection_callback(ctx.on_connection.clone()),
        );
        let janus = Arc::new(
            JanusClient::from_config(ctx.config, ctx.stream, Some(ctx.faults))
                .with_connection_callback(ctx.on_connection),
        );

        Ok(SessionClients {
            state: state.clone(),
            media: janus.clone(),
            signaling: janus.clone(),
            actions: state.clone(),
            reconnect_targets: vec![
                state as Arc<dyn Reconnectable>,
                janus as Arc<dyn Reconnectable>,
            ],
        })
    }
}

/// Live device or profile change applied to a running session
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    CameraFormat(VideoCaptureCapability),
    CameraDevice(Option<String>),
    CaptureDevice(Option<String>),
    PlaybackDevice(Option<String>),
    PlaybackVolume(f32),
    ScreenShareProfile(ScreenShareProfile),
}

impl ConfigChange {
    fn apply_to_config(&self, config: &mut StreamConfig) {
        match self {
            ConfigChange::CameraFormat(capability) => config.camera.capability = *capability,
            ConfigChange::CameraDevice(device) => config.camera.device = device.clone(),
            ConfigChange::CaptureDevice(device) => config.audio.capture_device = device.clone(),
            ConfigChange::PlaybackDevice(device) => config.audio.playback_device = device.clone(),
            ConfigChange::PlaybackVolume(volume) => config.audio.playback_volume = *volume,
            ConfigChange::ScreenShareProfile(profile) => config.screen_share = *profile,
        }
    }

    fn apply_to_context(&self, context: &mut StreamContext) {
        match self {
            ConfigChange::CameraFormat(capability) => context.video.capability = *capability,
            ConfigChange::CameraDevice(device) => context.video.capture_device = device.clone(),
            ConfigChange::CaptureDevice(device) => context.audio.capture_device = device.clone(),
            ConfigChange::PlaybackDevice(device) => context.audio.playback_device = device.clone(),
            ConfigChange::PlaybackVolume(volume) => context.audio.playback_volume = *volume,
            ConfigChange::ScreenShareProfile(profile) => {
                context.screen.frame_rate = profile.frame_rate;
                context.screen.bitrate_kbps = profile.bitrate_kbps;
            }
        }
    }
}

/// Independently tracked state dimension of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Stream,
    Camera,
    ScreenShare,
}

struct Facets {
    stream: FacetState,
    camera: FacetState,
    screen: FacetState,
    events: EventBus,
}

impl Facets {
    fn new(events: EventBus) -> Self {
        Self {
            stream: FacetState::default(),
            camera: FacetState::default(),
            screen: FacetState::default(),
            events,
        }
    }

    fn facet(&mut self, facet: Facet) -> &mut FacetState {
        match facet {
            Facet::Stream => &mut self.stream,
            Facet::Camera => &mut self.camera,
            Facet::ScreenShare => &mut self.screen,
        }
    }

    fn get(&self, facet: Facet) -> ExecutableState {
        match facet {
            Facet::Stream => self.stream.current(),
            Facet::Camera => self.camera.current(),
            Facet::ScreenShare => self.screen.current(),
        }
    }

    fn publish(&self, facet: Facet, state: ExecutableState) {
        let event = match facet {
            Facet::Stream => SessionEvent::StreamState(state),
            Facet::Camera => SessionEvent::CameraState(state),
            Facet::ScreenShare => SessionEvent::ScreenShareState(state),
        };
        self.events.publish(event);
    }

    fn set(&mut self, facet: Facet, state: ExecutableState) -> Result<()> {
        if self.facet(facet).transition(state)? {
            self.publish(facet, state);
        }
        Ok(())
    }

    /// Enter `Starting`, initializing a fresh facet first
    fn begin_start(&mut self, facet: Facet) -> Result<()> {
        if self.get(facet) == ExecutableState::Created {
            self.set(facet, ExecutableState::Initialized)?;
        }
        self.set(facet, ExecutableState::Starting)
    }

    /// Demote an active facet to `Error`
    fn fail(&mut self, facet: Facet) {
        if matches!(
            self.get(facet),
            ExecutableState::Starting | ExecutableState::Started | ExecutableState::Stopping
        ) {
            let _ = self.set(facet, ExecutableState::Error);
        }
    }

    /// Force a nested facet to `Stopped`
    fn reset(&mut self, facet: Facet) {
        if matches!(self.get(facet), ExecutableState::Created) {
            return;
        }
        if self.facet(facet).reset() {
            self.publish(facet, ExecutableState::Stopped);
        }
    }
}

type SharedFacets = Arc<Mutex<Facets>>;

struct Session {
    course: Course,
    context: SharedContext,
    clients: SessionClients,
    peers: Arc<PeerConnectionManager>,
    failover: FailoverMonitor,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Orchestrates a live-streaming session
pub struct StreamSessionController {
    config: Arc<RwLock<StreamConfig>>,
    course: Option<Course>,
    facets: SharedFacets,
    events: EventBus,
    client_factory: Arc<dyn ClientFactory>,
    peer_factory: Arc<dyn PeerConnectionFactory>,
    uploader: Option<Arc<dyn DocumentUploader>>,
    speech: Option<Arc<dyn SpeechService>>,
    audio_sink: Option<Arc<dyn AudioSink>>,
    recorder: Arc<tokio::sync::Mutex<EventRecorder>>,
    config_changes: broadcast::Sender<ConfigChange>,
    screen_source: Option<ScreenSource>,
    session: Option<Session>,
}

impl StreamSessionController {
    /// Controller with the WebSocket clients and the REST publisher service
    pub fn new(config: StreamConfig, documents: Arc<dyn DocumentSource>) -> Result<Self> {
        config.validate()?;

        let rest = Arc::new(StreamRestClient::from_config(&config)?);
        let mut controller = Self::with_recorder(config, EventRecorder::new(documents));
        controller.uploader = Some(rest.clone());
        controller.speech = Some(rest);

        Ok(controller)
    }

    /// Controller around an existing recorder, without REST services
    pub fn with_recorder(config: StreamConfig, mut recorder: EventRecorder) -> Self {
        let events = EventBus::default();
        recorder.set_event_bus(events.clone());
        let (config_changes, _) = broadcast::channel(16);

        Self {
            config: Arc::new(RwLock::new(config)),
            course: None,
            facets: Arc::new(Mutex::new(Facets::new(events.clone()))),
            events,
            client_factory: Arc::new(WebSocketClientFactory),
            peer_factory: Arc::new(RtcPeerConnectionFactory),
            uploader: None,
            speech: None,
            audio_sink: None,
            recorder: Arc::new(tokio::sync::Mutex::new(recorder)),
            config_changes,
            screen_source: None,
            session: None,
        }
    }

    pub fn with_client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = factory;
        self
    }

    pub fn with_peer_factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.peer_factory = factory;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn DocumentUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_speech_service(mut self, speech: Arc<dyn SpeechService>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Feed captured audio, converted to the recording format, into `sink`
    pub fn with_audio_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.audio_sink = Some(sink);
        self
    }

    pub fn set_course(&mut self, course: Option<Course>) {
        self.course = course;
    }

    pub fn course(&self) -> Option<&Course> {
        self.course.as_ref()
    }

    pub fn config(&self) -> StreamConfig {
        self.config.read().clone()
    }

    /// Replace the configuration used by the next start
    pub fn set_config(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// Publisher of live configuration changes
    pub fn config_changes(&self) -> broadcast::Sender<ConfigChange> {
        self.config_changes.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    /// Live context of the running session
    pub fn context(&self) -> Option<SharedContext> {
        self.session.as_ref().map(|s| s.context.clone())
    }

    pub fn recorder(&self) -> Arc<tokio::sync::Mutex<EventRecorder>> {
        self.recorder.clone()
    }

    pub fn peers(&self) -> Option<Arc<PeerConnectionManager>> {
        self.session.as_ref().map(|s| s.peers.clone())
    }

    pub fn state(&self, facet: Facet) -> ExecutableState {
        self.facets.lock().get(facet)
    }

    pub fn stream_state(&self) -> ExecutableState {
        self.state(Facet::Stream)
    }

    pub fn camera_state(&self) -> ExecutableState {
        self.state(Facet::Camera)
    }

    pub fn screen_share_state(&self) -> ExecutableState {
        self.state(Facet::ScreenShare)
    }

    fn started(&self) -> bool {
        self.stream_state() == ExecutableState::Started && self.session.is_some()
    }

    /// Start the session, or resume it after `suspend()`
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        match self.stream_state() {
            ExecutableState::Started => return Ok(()),
            ExecutableState::Suspended => return self.resume().await,
            _ => {}
        }

        let course = self.course.clone().ok_or(Error::MissingCourse)?;
        let config = self.config();
        config.validate()?;

        let camera_enabled = config.camera_enabled;
        {
            let mut facets = self.facets.lock();
            facets.begin_start(Facet::Stream)?;
            if camera_enabled {
                facets.begin_start(Facet::Camera)?;
            }
        }

        match self.start_session(&config, course).await {
            Ok(session) => {
                self.session = Some(session);

                let mut facets = self.facets.lock();
                facets.set(Facet::Stream, ExecutableState::Started)?;
                if camera_enabled {
                    facets.set(Facet::Camera, ExecutableState::Started)?;
                }
                info!("Stream session started");
                Ok(())
            }
            Err(e) => {
                error!("Start stream failed: {}", e);
                let mut facets = self.facets.lock();
                facets.fail(Facet::Stream);
                facets.fail(Facet::Camera);
                Err(e)
            }
        }
    }

    async fn start_session(&self, config: &StreamConfig, course: Course) -> Result<Session> {
        let context = self.build_context(config, &course)?;

        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel::<(String, ConnectionEvent)>();
        let on_connection: ConnectionCallback = Arc::new(move |name, event| {
            let _ = conn_tx.send((name.to_string(), event));
        });

        let clients = self.client_factory.create(ClientContext {
            config,
            stream: context.clone(),
            faults: fault_tx.clone(),
            on_connection,
        })?;

        let peers = Arc::new(PeerConnectionManager::new(
            self.peer_factory.clone(),
            context.clone(),
            clients.signaling.clone(),
            Some(fault_tx.clone()),
        ));
        clients.media.set_listener(peers.clone());

        let failover = FailoverMonitor::new(
            ReconnectionPolicy::from_config(&config.reconnect),
            clients.reconnect_targets.clone(),
            self.events.clone(),
            Some(fault_tx),
        );

        let mut session = Session {
            course,
            context,
            clients,
            peers,
            failover,
            tasks: Vec::new(),
        };

        session.tasks.push(tokio::spawn(Self::forward_connection_events(
            conn_rx,
            session.failover.clone(),
        )));
        session.tasks.push(tokio::spawn(Self::handle_faults(
            fault_rx,
            self.facets.clone(),
            self.events.clone(),
        )));
        session.tasks.push(tokio::spawn(Self::apply_config_changes(
            self.config_changes.subscribe(),
            self.config.clone(),
            session.context.clone(),
        )));

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        session.context.write().screen.source_ended = Some(Arc::new(move || {
            let _ = ended_tx.send(());
        }));
        session.tasks.push(tokio::spawn(Self::watch_screen_source(
            ended_rx,
            self.facets.clone(),
            session.context.clone(),
        )));

        if let Err(e) = self.connect_session(&session).await {
            if let Err(e) = self.recorder.lock().await.stop().await {
                debug!("Stop recorder failed: {}", e);
            }

            Self::shutdown_session(session, self.speech.clone(), false).await;
            return Err(e);
        }

        Ok(session)
    }

    fn build_context(&self, config: &StreamConfig, course: &Course) -> Result<SharedContext> {
        let mut context = StreamContext::from_config(config, Some(course.clone()));

        context.screen.source = self.screen_source.clone();

        if let Some(sink) = &self.audio_sink {
            let processor = AudioFrameProcessor::new(
                config.recording_audio.sample_rate,
                config.recording_audio.channels,
                sink.clone(),
            )?;
            context.audio.frame_consumer = Some(Arc::new(Mutex::new(processor)));
        }

        let events = self.events.clone();
        context.peer_state_consumer = Some(Arc::new(move |contact, state| {
            events.publish(SessionEvent::PeerConnectionState {
                contact: contact.clone(),
                state,
            });
        }));

        Ok(context.into_shared())
    }

    /// Clients first, then the recorder, which must see a live channel
    async fn connect_session(&self, session: &Session) -> Result<()> {
        session.clients.state.connect().await?;
        session.clients.media.connect(&session.course).await?;

        {
            let mut recorder = self.recorder.lock().await;
            recorder.set_course(Some(session.course.clone()));
            recorder.set_action_consumer(Some(session.clients.actions.clone()));
            recorder.set_uploader(self.uploader.clone());
            recorder.start().await?;
        }

        session.failover.start()?;

        if let Some(speech) = &self.speech {
            if let Err(e) = speech.set_recording(&session.course.id, true).await {
                warn!("Set course recording failed: {}", e);
            }
        }

        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.facets
            .lock()
            .set(Facet::Stream, ExecutableState::Starting)?;

        let result = self.recorder.lock().await.start().await;

        let mut facets = self.facets.lock();
        match result {
            Ok(()) => facets.set(Facet::Stream, ExecutableState::Started),
            Err(e) => {
                error!("Resume stream failed: {}", e);
                facets.fail(Facet::Stream);
                facets.fail(Facet::Camera);
                Err(e)
            }
        }
    }

    /// Pause the session; the recorder's clock stops until the next start
    pub async fn suspend(&mut self) -> Result<()> {
        if self.stream_state() != ExecutableState::Started {
            return Ok(());
        }

        self.recorder.lock().await.suspend().await?;
        self.facets
            .lock()
            .set(Facet::Stream, ExecutableState::Suspended)?;

        info!("Stream session suspended");
        Ok(())
    }

    /// Stop the session and release every client
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        match self.stream_state() {
            ExecutableState::Started | ExecutableState::Suspended | ExecutableState::Error => {}
            _ => return Ok(()),
        }

        self.facets
            .lock()
            .set(Facet::Stream, ExecutableState::Stopping)?;

        if let Err(e) = self.recorder.lock().await.stop().await {
            warn!("Stop recorder failed: {}", e);
        }

        if let Some(session) = self.session.take() {
            Self::shutdown_session(session, self.speech.clone(), true).await;
        }

        let mut facets = self.facets.lock();
        facets.reset(Facet::Camera);
        facets.reset(Facet::ScreenShare);
        facets.set(Facet::Stream, ExecutableState::Stopped)?;

        info!("Stream session stopped");
        Ok(())
    }

    /// Tear down in dependency order: peers, then the clients they use
    async fn shutdown_session(
        mut session: Session,
        speech: Option<Arc<dyn SpeechService>>,
        was_recording: bool,
    ) {
        if let Err(e) = session.failover.stop() {
            debug!("Stop failover monitor failed: {}", e);
        }
        session.abort_tasks();

        if let Err(e) = session.peers.logout().await {
            warn!("Close peer connections failed: {}", e);
        }
        if let Err(e) = session.clients.state.disconnect().await {
            warn!("Disconnect state client failed: {}", e);
        }
        if let Err(e) = session.clients.media.disconnect().await {
            warn!("Disconnect media client failed: {}", e);
        }

        if was_recording {
            if let Some(speech) = speech {
                if let Err(e) = speech.set_recording(&session.course.id, false).await {
                    warn!("Set course recording failed: {}", e);
                }
            }
        }
    }

    async fn forward_connection_events(
        mut rx: mpsc::UnboundedReceiver<(String, ConnectionEvent)>,
        failover: FailoverMonitor,
    ) {
        let callback = failover.connection_callback();
        while let Some((name, event)) = rx.recv().await {
            callback(&name, event);
        }
    }

    async fn handle_faults(
        mut rx: mpsc::UnboundedReceiver<crate::error::ClientFault>,
        facets: SharedFacets,
        events: EventBus,
    ) {
        while let Some(fault) = rx.recv().await {
            match fault.kind {
                FaultKind::Handler => {
                    error!("Signaling fault: {}", fault.message);
                    let mut facets = facets.lock();
                    facets.fail(Facet::Stream);
                    facets.fail(Facet::Camera);
                }
                FaultKind::Media(media_type) => {
                    warn!("{} media fault: {}", media_type, fault.message);
                    events.publish(SessionEvent::MediaError {
                        media_type,
                        message: fault.message,
                    });
                }
            }
        }
    }

    async fn apply_config_changes(
        mut rx: broadcast::Receiver<ConfigChange>,
        config: Arc<RwLock<StreamConfig>>,
        context: SharedContext,
    ) {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    debug!("Applying config change {:?}", change);
                    change.apply_to_config(&mut config.write());
                    change.apply_to_context(&mut context.write());
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} config changes", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn watch_screen_source(
        mut rx: mpsc::UnboundedReceiver<()>,
        facets: SharedFacets,
        context: SharedContext,
    ) {
        while rx.recv().await.is_some() {
            info!("Screen source ended");
            Self::halt_screen_share(&facets, &context);
        }
    }

    fn halt_screen_share(facets: &SharedFacets, context: &SharedContext) {
        let mut facets = facets.lock();
        if facets.get(Facet::ScreenShare) != ExecutableState::Started {
            return;
        }

        let _ = facets.set(Facet::ScreenShare, ExecutableState::Stopping);
        context.write().screen.send_screen = false;
        let _ = facets.set(Facet::ScreenShare, ExecutableState::Stopped);
    }

    fn require_stream(&self, facet: Facet) -> Result<&Session> {
        match &self.session {
            Some(session) if self.stream_state() == ExecutableState::Started => Ok(session),
            _ => Err(Error::InvalidStateTransition {
                from: self.state(facet),
                to: ExecutableState::Starting,
            }),
        }
    }

    pub async fn start_camera_stream(&mut self) -> Result<()> {
        if self.camera_state() == ExecutableState::Started {
            return Ok(());
        }
        let session = self.require_stream(Facet::Camera)?;
        let (context, peers) = (session.context.clone(), session.peers.clone());

        self.facets.lock().begin_start(Facet::Camera)?;
        context.write().video.send_video = true;

        let result = peers.renegotiate(true).await;

        let mut facets = self.facets.lock();
        match result {
            Ok(()) => facets.set(Facet::Camera, ExecutableState::Started),
            Err(e) => {
                error!("Start camera stream failed: {}", e);
                context.write().video.send_video = false;
                facets.fail(Facet::Camera);
                Err(e)
            }
        }
    }

    pub async fn stop_camera_stream(&mut self) -> Result<()> {
        if self.camera_state() != ExecutableState::Started {
            return Ok(());
        }

        let mut facets = self.facets.lock();
        facets.set(Facet::Camera, ExecutableState::Stopping)?;
        if let Some(context) = self.session.as_ref().map(|s| &s.context) {
            context.write().video.send_video = false;
        }
        facets.set(Facet::Camera, ExecutableState::Stopped)
    }

    /// Select the screen or window to share
    pub fn set_screen_source(&mut self, source: Option<ScreenSource>) {
        if let Some(session) = &self.session {
            session.context.write().screen.source = source.clone();
        }
        self.screen_source = source;
    }

    pub async fn start_screen_share(&mut self) -> Result<()> {
        if self.screen_share_state() == ExecutableState::Started {
            return Ok(());
        }
        if !self.config.read().screen_share_enabled {
            return Err(Error::InvalidConfig("Screen sharing is disabled".to_string()));
        }
        if self.screen_source.is_none() {
            return Err(Error::InvalidConfig("No screen source selected".to_string()));
        }

        let session = self.require_stream(Facet::ScreenShare)?;
        let (context, peers) = (session.context.clone(), session.peers.clone());

        self.facets.lock().begin_start(Facet::ScreenShare)?;
        let with_video = {
            let mut context = context.write();
            context.screen.source = self.screen_source.clone();
            context.screen.send_screen = true;
            context.video.send_video
        };

        let result = peers.renegotiate(with_video).await;

        let mut facets = self.facets.lock();
        match result {
            Ok(()) => facets.set(Facet::ScreenShare, ExecutableState::Started),
            Err(e) => {
                error!("Start screen share failed: {}", e);
                context.write().screen.send_screen = false;
                facets.fail(Facet::ScreenShare);
                Err(e)
            }
        }
    }

    pub async fn stop_screen_share(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            Self::halt_screen_share(&self.facets, &session.context);
        }
        Ok(())
    }

    /// The shared screen or window went away
    pub fn on_screen_source_ended(&mut self) {
        if let Some(session) = &self.session {
            Self::halt_screen_share(&self.facets, &session.context);
        }
        self.screen_source = None;
    }

    /// Let an audience member speak
    pub async fn accept_speech_request(&self, request_id: Uuid, user_name: &str) -> Result<()> {
        if !self.started() {
            return Ok(());
        }
        let Some(session) = &self.session else {
            return Ok(());
        };

        session
            .clients
            .media
            .start_remote_speech(request_id, user_name)
            .await?;

        if let Some(speech) = &self.speech {
            speech.accept_speech_request(request_id).await?;
        }
        Ok(())
    }

    pub async fn reject_speech_request(&self, request_id: Uuid) -> Result<()> {
        if !self.started() {
            return Ok(());
        }

        match &self.speech {
            Some(speech) => speech.reject_speech_request(request_id).await,
            None => Ok(()),
        }
    }

    /// End the speech of an audience member by feed id
    pub async fn stop_peer_connection(&self, peer_id: u64) -> Result<()> {
        if !self.started() {
            return Ok(());
        }
        let Some(session) = &self.session else {
            return Ok(());
        };

        session.clients.media.stop_remote_speech(peer_id).await
    }

    pub fn mute_peer_audio(&self, mute: bool) {
        if !self.started() {
            return;
        }
        if let Some(session) = &self.session {
            session.context.write().audio.receive_audio = !mute;
        }
    }

    pub fn mute_peer_video(&self, mute: bool) {
        if !self.started() {
            return;
        }
        if let Some(session) = &self.session {
            session.context.write().video.receive_video = !mute;
        }
    }

    pub fn set_microphone_enabled(&self, enabled: bool) {
        self.config.write().microphone_enabled = enabled;
        if let Some(session) = &self.session {
            session.context.write().audio.send_audio = enabled;
        }
    }

    /// Stop the session, if any, waiting at most `timeout`
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.stop())
            .await
            .map_err(|_| Error::Timeout("Stopping stream session timed out".to_string()))?
    }
}

impl Drop for StreamSessionController {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort_tasks();
            if let Err(e) = session.failover.stop() {
                debug!("Stop failover monitor failed: {}", e);
            }
        }
    }
}
