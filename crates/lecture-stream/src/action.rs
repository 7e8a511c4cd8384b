//! Replayable playback actions
//!
//! Every presenter, page and document event that reaches the audience is
//! expressed as a [`PlaybackAction`]. Actions carry document ids and page
//! numbers rather than local references so they can be replayed by a
//! freshly joined viewer.

use crate::document::{DocumentKind, PageRef};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque presenter tool action, e.g. a pen stroke or a text edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenterAction {
    /// Tool or action kind, e.g. `pen`, `highlighter`, `undo`
    pub kind: String,

    /// Tool-specific payload
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PresenterAction {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Action forwarded on the session-state channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackAction {
    DocumentCreate {
        document_id: Uuid,
        /// Content checksum of the uploaded document
        checksum: String,
        /// Remote file handle returned by the upload endpoint
        remote_file: String,
        title: String,
        kind: DocumentKind,
    },
    DocumentClose {
        document_id: Uuid,
    },
    DocumentSelect {
        document_id: Uuid,
    },
    PageCreated {
        page: PageRef,
    },
    PageDeleted {
        page: PageRef,
    },
    PageSelected {
        page: PageRef,
    },
    PagePlayback {
        page: PageRef,
        action: PresenterAction,
        /// Elapsed session time in milliseconds
        timestamp: u64,
    },
    Init {
        course_id: String,
    },
    Start {
        course_id: String,
    },
}

impl PlaybackAction {
    /// Document this action refers to, if any
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            PlaybackAction::DocumentCreate { document_id, .. }
            | PlaybackAction::DocumentClose { document_id }
            | PlaybackAction::DocumentSelect { document_id } => Some(*document_id),
            PlaybackAction::PageCreated { page }
            | PlaybackAction::PageDeleted { page }
            | PlaybackAction::PageSelected { page }
            | PlaybackAction::PagePlayback { page, .. } => Some(page.document_id),
            PlaybackAction::Init { .. } | PlaybackAction::Start { .. } => None,
        }
    }
}

/// Receiver of actions forwarded by the recorder
#[async_trait]
pub trait ActionConsumer: Send + Sync {
    async fn consume(&self, action: PlaybackAction) -> Result<()>;
}

/// Buffered actions of one page, in replay order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedPage {
    pub document_id: Uuid,
    pub number: u32,
    pub actions: Vec<PlaybackAction>,
}

/// Per-page buffer of presenter actions not yet replayed to the audience.
///
/// Pages keep the order in which they first received an action; actions keep
/// insertion order within their page.
#[derive(Debug, Default, Clone)]
pub struct PendingActions {
    pages: Vec<RecordedPage>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page: PageRef, action: PlaybackAction) {
        match self
            .pages
            .iter_mut()
            .find(|p| p.document_id == page.document_id && p.number == page.number)
        {
            Some(recorded) => recorded.actions.push(action),
            None => self.pages.push(RecordedPage {
                document_id: page.document_id,
                number: page.number,
                actions: vec![action],
            }),
        }
    }

    /// Drop every buffered page of a document
    pub fn purge_document(&mut self, document_id: Uuid) -> usize {
        let before = self.pages.len();
        self.pages.retain(|p| p.document_id != document_id);
        before - self.pages.len()
    }

    /// Snapshot of all pages with buffered actions
    pub fn recorded_pages(&self) -> Vec<RecordedPage> {
        self.pages
            .iter()
            .filter(|p| !p.actions.is_empty())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.actions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(page: PageRef, n: u64) -> PlaybackAction {
        PlaybackAction::PagePlayback {
            page,
            action: PresenterAction::new("pen", serde_json::json!({ "n": n })),
            timestamp: n,
        }
    }

    #[test]
    fn test_pending_actions_grouped_by_page() {
        let doc = Uuid::new_v4();
        let p1 = PageRef { document_id: doc, number: 1 };
        let p3 = PageRef { document_id: doc, number: 3 };

        let mut pending = PendingActions::new();
        pending.push(p3, stroke(p3, 1));
        pending.push(p1, stroke(p1, 2));
        pending.push(p3, stroke(p3, 3));

        let pages = pending.recorded_pages();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].actions, vec![stroke(p3, 1), stroke(p3, 3)]);
        assert_eq!(pages[1].number, 1);
        assert_eq!(pending.len(), 3);
    }

    #[test]
    fn test_purge_document() {
        let a = PageRef { document_id: Uuid::new_v4(), number: 0 };
        let b = PageRef { document_id: Uuid::new_v4(), number: 0 };

        let mut pending = PendingActions::new();
        pending.push(a, stroke(a, 1));
        pending.push(b, stroke(b, 2));

        assert_eq!(pending.purge_document(a.document_id), 1);
        assert_eq!(pending.recorded_pages()[0].document_id, b.document_id);
    }

    #[test]
    fn test_action_wire_format() {
        let action = PlaybackAction::Init {
            course_id: "C1".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["course_id"], "C1");
        assert_eq!(action.document_id(), None);
    }
}
