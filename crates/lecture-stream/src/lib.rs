//! Live-streaming sessions for lecture capture
//!
//! This crate drives a presenter's live stream: the WebRTC peer connection
//! towards a Janus-style media server, the session-state channel that
//! receives every recorded presenter action, and a recorder that keeps the
//! timeline of documents, pages and annotations in sync with the stream.
//!
//! # Features
//!
//! - **Facet lifecycle**: stream, camera and screen share are tracked as
//!   independent [`ExecutableState`] machines
//! - **Peer connection management**: one actor owns every connection, keyed
//!   by [`Contact`]
//! - **Event recording**: presenter actions are timestamped against an
//!   elapsed clock that pauses while the stream is suspended
//! - **Failover**: dropped signaling clients are reconnected with backoff
//! - **Recording audio**: captured frames are resampled to a fixed format
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  StreamSessionController                                 │
//! │  ├─ StreamContext (shared device and media flags)        │
//! │  ├─ StreamStateClient (session-state WebSocket)          │
//! │  ├─ JanusClient (media room signaling)                   │
//! │  │   └─ PeerConnectionManager (contact -> connection)    │
//! │  ├─ EventRecorder (documents, pages, timestamps)         │
//! │  └─ FailoverMonitor (reconnect with backoff)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use lecture_stream::StreamConfig;
//!
//! let config = StreamConfig::from_toml_str(r#"
//!     server_name = "stream.example.org"
//!     camera_enabled = false
//! "#).unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.janus_url(), "wss://stream.example.org/janus");
//! ```

#![warn(clippy::all)]

pub mod action;
pub mod clock;
pub mod config;
pub mod context;
pub mod controller;
pub mod document;
pub mod error;
pub mod events;
pub mod failover;
pub mod media;
pub mod peer;
pub mod recorder;
pub mod rest;
pub mod signaling;
pub mod state;

pub use action::{ActionConsumer, PendingActions, PlaybackAction, PresenterAction};
pub use config::StreamConfig;
pub use context::{Course, SharedContext, StreamContext};
pub use controller::{ConfigChange, Facet, StreamSessionController};
pub use document::{Document, DocumentKind, DocumentSource, PageRef};
pub use error::{Error, Result};
pub use events::{EventBus, SessionEvent};
pub use peer::{Contact, PeerConnectionManager, PeerState};
pub use recorder::{DocumentEvent, EventRecorder, PageEvent};
pub use state::{Executable, ExecutableState};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
