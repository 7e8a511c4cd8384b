//! State-changed notifications published to observers

use crate::error::MediaType;
use crate::peer::{Contact, PeerState};
use crate::state::ExecutableState;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification about a session facet or connection
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StreamState(ExecutableState),
    CameraState(ExecutableState),
    ScreenShareState(ExecutableState),
    RecordingState(ExecutableState),
    PeerConnectionState { contact: Contact, state: PeerState },
    MediaError { media_type: MediaType, message: String },
    Reconnecting { client: String },
    Reconnected { client: String },
    ReconnectFailed { client: String },
}

/// Broadcast publisher of [`SessionEvent`]s
///
/// # Example
///
/// ```
/// use lecture_stream::{EventBus, ExecutableState, SessionEvent};
///
/// # tokio_test::block_on(async {
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SessionEvent::StreamState(ExecutableState::Started));
/// assert_eq!(
///     rx.recv().await.unwrap(),
///     SessionEvent::StreamState(ExecutableState::Started)
/// );
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: SessionEvent) {
        trace!(?event, "Publishing session event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
