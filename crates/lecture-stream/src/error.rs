//! Error types for the streaming session

use crate::state::ExecutableState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type alias using the session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session, signaling and recording operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No course selected before the session was started
    #[error("No course associated with the stream session")]
    MissingCourse,

    /// Facet transition outside the lifecycle graph
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: ExecutableState,
        to: ExecutableState,
    },

    /// Network operation timed out
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Connection refused, reset or otherwise unreachable
    #[error("Network error: {0}")]
    Network(String),

    /// Signaling protocol error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Document upload rejected or malformed response
    #[error("Upload error: {0}")]
    Upload(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    Sdp(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Audio conversion error
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::Network(_)
                | Error::Signaling(_)
                | Error::WebSocket(_)
                | Error::Io(_)
        )
    }

    /// Check if this error is a transport timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::MissingCourse)
    }

    /// Dictionary key of the user-facing message for this error.
    ///
    /// `fallback` names the operation-specific title (e.g.
    /// `stream.start.error`) used when no more specific message applies.
    pub fn message_key<'a>(&self, fallback: &'a str) -> &'a str {
        if self.is_timeout() {
            "service.timeout.error"
        } else if matches!(self, Error::MissingCourse) {
            "stream.course.missing"
        } else {
            fallback
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Error::Network(e.to_string())
        } else if e.is_decode() || e.is_body() {
            Error::Upload(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                Error::Timeout(io.to_string())
            }
            WsError::Io(io) => Error::Network(io.to_string()),
            other => Error::WebSocket(other.to_string()),
        }
    }
}

/// Media kind affected by a peer-connection media fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Screen,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
            MediaType::Screen => write!(f, "screen"),
        }
    }
}

/// Classification of an asynchronous signaling fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Generic signaling handler failure
    Handler,
    /// Peer-connection media failure, e.g. capture device unavailable
    Media(MediaType),
}

/// Fault reported by a signaling client long after the triggering call returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFault {
    pub kind: FaultKind,
    pub message: String,
}

impl ClientFault {
    pub fn handler(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Handler,
            message: message.into(),
        }
    }

    pub fn media(media_type: MediaType, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Media(media_type),
            message: message.into(),
        }
    }
}
