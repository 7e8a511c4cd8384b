//! WebRTC peer connection management
//!
//! Handles per-contact connections, SDP/ICE negotiation and local media
//! tracks.

pub mod connection;
pub mod manager;

pub use connection::{
    Contact, PeerConnectionClient, PeerConnectionContext, PeerConnectionFactory, PeerState,
    RtcPeerConnectionClient, RtcPeerConnectionFactory,
};
pub use manager::PeerConnectionManager;
