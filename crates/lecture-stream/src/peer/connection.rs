//! Per-contact peer connections

use crate::context::{IceServer, SharedContext};
use crate::error::{ClientFault, MediaType};
use crate::signaling::{FaultSink, IceCandidate, SessionDescription, SignalingChannel};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Identity of a session participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
}

impl Contact {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Fresh identity for the local participant
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), name)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// One media connection to a contact
#[async_trait]
pub trait PeerConnectionClient: Send + Sync {
    fn contact(&self) -> &Contact;

    /// Create the local offer and send it through signaling
    async fn init_call(&self, with_video: bool) -> Result<()>;

    /// Apply a remote description; an offer is answered through signaling
    async fn set_session_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn remove_ice_candidates(&self, candidates: Vec<IceCandidate>) -> Result<()>;

    /// Send a message on the data channel
    async fn send_message(&self, data: Bytes) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn has_local_stream(&self) -> bool;

    fn has_remote_stream(&self) -> bool;
}

/// Everything a new connection needs from the session
#[derive(Clone)]
pub struct PeerConnectionContext {
    pub contact: Contact,
    pub stream: SharedContext,
    pub signaling: Arc<dyn SignalingChannel>,
    pub faults: Option<FaultSink>,
}

/// Creates connections for the peer manager
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, ctx: PeerConnectionContext) -> Result<Arc<dyn PeerConnectionClient>>;
}

/// Factory of [`RtcPeerConnectionClient`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcPeerConnectionFactory;

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    async fn create(&self, ctx: PeerConnectionContext) -> Result<Arc<dyn PeerConnectionClient>> {
        Ok(Arc::new(RtcPeerConnectionClient::new(ctx).await?))
    }
}

/// Peer connection backed by the `webrtc` crate
pub struct RtcPeerConnectionClient {
    ctx: PeerConnectionContext,
    peer_connection: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    audio_track: RwLock<Option<Arc<TrackLocalStaticSample>>>,
    video_track: RwLock<Option<Arc<TrackLocalStaticSample>>>,
    screen_track: RwLock<Option<Arc<TrackLocalStaticSample>>>,
    receivers_added: AtomicBool,
    local_stream: AtomicBool,
    remote_stream: Arc<AtomicBool>,
}

fn to_rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        })
        .collect()
}

impl RtcPeerConnectionClient {
    #[instrument(skip(ctx), fields(contact = %ctx.contact))]
    pub async fn new(ctx: PeerConnectionContext) -> Result<Self> {
        info!("Creating peer connection for {}", ctx.contact);

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtc(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers = to_rtc_ice_servers(&ctx.stream.read().ice_servers);
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::WebRtc(format!("Failed to create peer connection: {}", e)),
        )?);

        let client = Self {
            ctx,
            peer_connection,
            data_channel: Arc::new(RwLock::new(None)),
            audio_track: RwLock::new(None),
            video_track: RwLock::new(None),
            screen_track: RwLock::new(None),
            receivers_added: AtomicBool::new(false),
            local_stream: AtomicBool::new(false),
            remote_stream: Arc::new(AtomicBool::new(false)),
        };
        client.register_handlers();

        Ok(client)
    }

    fn register_handlers(&self) {
        let contact = self.ctx.contact.clone();
        let stream = self.ctx.stream.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = PeerState::from(s);
                debug!("Peer {} state changed: {:?}", contact, state);

                let consumer = stream.read().peer_state_consumer.clone();
                if let Some(consumer) = consumer {
                    consumer(&contact, state);
                }
                Box::pin(async {})
            }));

        let contact = self.ctx.contact.clone();
        let signaling = self.ctx.signaling.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let contact = contact.clone();
                let signaling = signaling.clone();

                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        return;
                    };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!("Failed to encode local ICE candidate: {}", e);
                            return;
                        }
                    };
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                    };
                    if let Err(e) = signaling.send_ice_candidate(&contact, candidate).await {
                        warn!("Send ICE candidate failed: {}", e);
                    }
                })
            }));

        let remote_stream = self.remote_stream.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                debug!("Remote {} track added: {}", track.kind(), track.id());
                remote_stream.store(true, Ordering::SeqCst);
                Box::pin(async {})
            },
        ));

        let data_channel = self.data_channel.clone();
        self.peer_connection
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let data_channel = data_channel.clone();
                Box::pin(async move {
                    debug!("Remote data channel opened: {}", channel.label());
                    *data_channel.write().await = Some(channel);
                })
            }));
    }

    fn report_media_fault(&self, media_type: MediaType, message: String) {
        warn!("{} media setup failed for {}: {}", media_type, self.ctx.contact, message);

        if let Some(faults) = &self.ctx.faults {
            let _ = faults.send(ClientFault::media(media_type, message));
        }
    }

    async fn add_local_track(
        &self,
        media_type: MediaType,
        mime_type: &str,
        clock_rate: u32,
        channels: u16,
    ) -> Result<Arc<TrackLocalStaticSample>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                clock_rate,
                channels,
                ..Default::default()
            },
            media_type.to_string(),
            "lecture-stream".to_owned(),
        ));

        self.peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to add {} track: {}", media_type, e)))?;

        Ok(track)
    }

    async fn add_receiver(&self, kind: RTPCodecType) -> Result<()> {
        self.peer_connection
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to add transceiver: {}", e)))?;

        Ok(())
    }

    /// Set up local tracks and receive-only transceivers from the context flags.
    ///
    /// Tracks that already exist are kept, so a renegotiation only adds what
    /// was enabled since the last offer.
    async fn setup_media(&self, with_video: bool) {
        let (send_audio, receive_audio, send_video, receive_video, send_screen) = {
            let stream = self.ctx.stream.read();
            (
                stream.audio.send_audio,
                stream.audio.receive_audio,
                stream.video.send_video && with_video,
                stream.video.receive_video,
                stream.screen.send_screen,
            )
        };

        if send_audio && self.audio_track.read().await.is_none() {
            match self.add_local_track(MediaType::Audio, MIME_TYPE_OPUS, 48000, 2).await {
                Ok(track) => {
                    *self.audio_track.write().await = Some(track);
                    self.local_stream.store(true, Ordering::SeqCst);
                }
                Err(e) => self.report_media_fault(MediaType::Audio, e.to_string()),
            }
        }

        if send_video && self.video_track.read().await.is_none() {
            match self.add_local_track(MediaType::Video, MIME_TYPE_VP8, 90000, 0).await {
                Ok(track) => {
                    *self.video_track.write().await = Some(track);
                    self.local_stream.store(true, Ordering::SeqCst);
                }
                Err(e) => self.report_media_fault(MediaType::Video, e.to_string()),
            }
        }

        if send_screen && self.screen_track.read().await.is_none() {
            match self.add_local_track(MediaType::Screen, MIME_TYPE_VP8, 90000, 0).await {
                Ok(track) => {
                    *self.screen_track.write().await = Some(track);
                    self.local_stream.store(true, Ordering::SeqCst);
                }
                Err(e) => self.report_media_fault(MediaType::Screen, e.to_string()),
            }
        }

        if self.receivers_added.swap(true, Ordering::SeqCst) {
            return;
        }
        if receive_audio && !send_audio {
            if let Err(e) = self.add_receiver(RTPCodecType::Audio).await {
                self.report_media_fault(MediaType::Audio, e.to_string());
            }
        }
        if receive_video && !send_video {
            if let Err(e) = self.add_receiver(RTPCodecType::Video).await {
                self.report_media_fault(MediaType::Video, e.to_string());
            }
        }
    }

    /// Local audio track for the external encoder to write samples to
    pub async fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.audio_track.read().await.clone()
    }

    /// Local camera track for the external encoder to write samples to
    pub async fn video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.video_track.read().await.clone()
    }

    pub async fn screen_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.screen_track.read().await.clone()
    }

    async fn local_sdp(&self) -> Result<String> {
        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::Sdp("No local description".to_string()))?;

        Ok(local_desc.sdp)
    }
}

#[async_trait]
impl PeerConnectionClient for RtcPeerConnectionClient {
    fn contact(&self) -> &Contact {
        &self.ctx.contact
    }

    async fn init_call(&self, with_video: bool) -> Result<()> {
        self.setup_media(with_video).await;

        if self.data_channel.read().await.is_none() {
            let channel = self
                .peer_connection
                .create_data_channel("messages", None)
                .await
                .map_err(|e| {
                    Error::PeerConnection(format!("Failed to create data channel: {}", e))
                })?;
            *self.data_channel.write().await = Some(channel);
        }

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let sdp = self.local_sdp().await?;
        debug!("Created SDP offer for {}", self.ctx.contact);

        self.ctx
            .signaling
            .send_session_description(&self.ctx.contact, SessionDescription::offer(sdp))
            .await
    }

    async fn set_session_description(&self, description: SessionDescription) -> Result<()> {
        let is_offer = description.is_offer();
        let remote = if is_offer {
            RTCSessionDescription::offer(description.sdp)
        } else {
            RTCSessionDescription::answer(description.sdp)
        }
        .map_err(|e| Error::Sdp(format!("Failed to parse remote description: {}", e)))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set remote description: {}", e)))?;

        if !is_offer {
            return Ok(());
        }

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Sdp(format!("Failed to set local description: {}", e)))?;

        let sdp = self.local_sdp().await?;
        debug!("Created SDP answer for {}", self.ctx.contact);

        self.ctx
            .signaling
            .send_session_description(&self.ctx.contact, SessionDescription::answer(sdp))
            .await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| Error::IceCandidate(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn remove_ice_candidates(&self, candidates: Vec<IceCandidate>) -> Result<()> {
        // The ICE agent prunes stale candidates on its own.
        debug!(
            "Ignoring removal of {} ICE candidates for {}",
            candidates.len(),
            self.ctx.contact
        );
        Ok(())
    }

    async fn send_message(&self, data: Bytes) -> Result<()> {
        let channel = self
            .data_channel
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::PeerConnection("No data channel".to_string()))?;

        channel
            .send(&data)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to send message: {}", e)))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection for {}", self.ctx.contact);

        self.local_stream.store(false, Ordering::SeqCst);
        self.remote_stream.store(false, Ordering::SeqCst);

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to close connection: {}", e)))
    }

    fn has_local_stream(&self) -> bool {
        self.local_stream.load(Ordering::SeqCst)
    }

    fn has_remote_stream(&self) -> bool {
        self.remote_stream.load(Ordering::SeqCst)
    }
}
