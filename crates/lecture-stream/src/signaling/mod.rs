//! Signaling clients for the session-state and media-negotiation channels
//!
//! Two WebSocket endpoints are used per session:
//!
//! - the session-state channel ([`StreamStateClient`]) which receives every
//!   recorded [`PlaybackAction`](crate::action::PlaybackAction)
//! - the Janus-style media channel ([`JanusClient`]) which negotiates SDP and
//!   ICE candidates for the peer connections
//!
//! The peer manager talks to the media channel through [`SignalingChannel`]
//! and receives inbound negotiation through [`SignalingListener`].

pub mod janus;
pub mod protocol;
pub mod state_client;
pub mod ws;

pub use janus::JanusClient;
pub use state_client::StreamStateClient;

use crate::context::{Course, IceServer};
use crate::error::ClientFault;
use crate::peer::Contact;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Channel on which clients report asynchronous faults
pub type FaultSink = mpsc::UnboundedSender<ClientFault>;

/// Connection status of a signaling WebSocket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Closed,
    Failed(String),
}

/// Callback invoked with the client name and its connection status
pub type ConnectionCallback = Arc<dyn Fn(&str, ConnectionEvent) + Send + Sync>;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn is_offer(&self) -> bool {
        self.sdp_type == SdpType::Offer
    }
}

/// ICE connectivity candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Parameters of a joined media room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomParameters {
    /// Numeric participant id assigned by the media server
    pub participant_id: u64,

    /// Display name of the local participant
    pub display_name: String,

    /// Whether the local side sends the first offer
    pub initiator: bool,

    pub ice_servers: Vec<IceServer>,
}

/// Outbound negotiation, implemented by the media signaling client
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send_session_description(
        &self,
        contact: &Contact,
        description: SessionDescription,
    ) -> Result<()>;

    async fn send_ice_candidate(&self, contact: &Contact, candidate: IceCandidate) -> Result<()>;

    /// Join `room` under the display name of `as_contact`
    async fn join_room(&self, as_contact: &Contact, room: &str) -> Result<RoomParameters>;

    async fn leave_room(&self) -> Result<()>;
}

/// Inbound negotiation, implemented by the peer connection manager
#[async_trait]
pub trait SignalingListener: Send + Sync {
    /// Completes once the local connection exists
    async fn on_room_joined(&self, params: RoomParameters) -> Result<()>;

    fn on_remote_session_description(&self, contact: Contact, description: SessionDescription);

    fn on_remote_ice_candidate(&self, contact: Contact, candidate: IceCandidate);

    fn on_remote_ice_candidates_removed(&self, contact: Contact, candidates: Vec<IceCandidate>);
}

/// Session-state channel as seen by the controller
#[async_trait]
pub trait StateChannel: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Media-negotiation channel as seen by the controller
#[async_trait]
pub trait MediaChannel: Send + Sync {
    fn set_listener(&self, listener: Arc<dyn SignalingListener>);

    /// Connect and join the course room
    async fn connect(&self, course: &Course) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Let an audience member publish into the room
    async fn start_remote_speech(&self, request_id: Uuid, user_name: &str) -> Result<()>;

    /// Remove a speaking audience member by feed id
    async fn stop_remote_speech(&self, peer_id: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_candidate_field_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 10.0.0.2 51234 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_session_description_type() {
        let json = serde_json::to_string(&SessionDescription::offer("v=0")).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
        assert!(!SessionDescription::answer("v=0").is_offer());
    }
}
