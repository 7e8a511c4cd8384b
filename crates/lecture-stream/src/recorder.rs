//! Synchronized event recording
//!
//! The [`EventRecorder`] turns presenter, page and document events into
//! timestamped [`PlaybackAction`]s. Presenter actions are always buffered
//! per page so a (re)started session can replay them to a fresh audience;
//! actions are only forwarded while the recording facet is `Starting` or
//! `Started`.

use crate::action::{ActionConsumer, PendingActions, PlaybackAction, PresenterAction, RecordedPage};
use crate::clock::{ElapsedClock, SystemTimeSource, TimeSource};
use crate::context::Course;
use crate::document::{Document, DocumentSource, PageRef};
use crate::events::{EventBus, SessionEvent};
use crate::rest::DocumentUploader;
use crate::state::{Executable, ExecutableState, FacetState};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Pages of the template a whiteboard is cloned into before upload
pub const WHITEBOARD_TEMPLATE_PAGES: u32 = 100;

/// Page lifecycle event from the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Created(PageRef),
    Deleted(PageRef),
    Selected(PageRef),
}

impl PageEvent {
    pub fn page(&self) -> PageRef {
        match self {
            PageEvent::Created(page) | PageEvent::Deleted(page) | PageEvent::Selected(page) => {
                *page
            }
        }
    }

    fn to_action(self) -> PlaybackAction {
        match self {
            PageEvent::Created(page) => PlaybackAction::PageCreated { page },
            PageEvent::Deleted(page) => PlaybackAction::PageDeleted { page },
            PageEvent::Selected(page) => PlaybackAction::PageSelected { page },
        }
    }
}

/// Document lifecycle event from the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Created(Document),
    Closed(Document),
    Selected(Document),
    Replaced { old: Document, new: Document },
    /// Content changed in place, e.g. a quiz received answers
    Changed(Document),
}

/// Records and forwards the presenter timeline of a session
pub struct EventRecorder {
    facet: FacetState,
    clock: ElapsedClock,
    time: Arc<dyn TimeSource>,
    pending: PendingActions,
    pending_page: Option<PageRef>,
    course: Option<Course>,
    documents: Arc<dyn DocumentSource>,
    uploader: Option<Arc<dyn DocumentUploader>>,
    consumer: Option<Arc<dyn ActionConsumer>>,
    events: Option<EventBus>,
}

impl EventRecorder {
    pub fn new(documents: Arc<dyn DocumentSource>) -> Self {
        Self::with_time_source(documents, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(documents: Arc<dyn DocumentSource>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            facet: FacetState::default(),
            clock: ElapsedClock::default(),
            time,
            pending: PendingActions::new(),
            pending_page: None,
            course: None,
            documents,
            uploader: None,
            consumer: None,
            events: None,
        }
    }

    /// Publish recording state changes on `events`
    pub fn set_event_bus(&mut self, events: EventBus) {
        self.events = Some(events);
    }

    pub fn set_course(&mut self, course: Option<Course>) {
        self.course = course;
    }

    pub fn course(&self) -> Option<&Course> {
        self.course.as_ref()
    }

    pub fn set_action_consumer(&mut self, consumer: Option<Arc<dyn ActionConsumer>>) {
        self.consumer = consumer;
    }

    pub fn set_uploader(&mut self, uploader: Option<Arc<dyn DocumentUploader>>) {
        self.uploader = uploader;
    }

    pub fn pending_actions(&self) -> &PendingActions {
        &self.pending
    }

    pub fn pending_page(&self) -> Option<PageRef> {
        self.pending_page
    }

    /// Elapsed session time in milliseconds
    pub fn elapsed(&self) -> u64 {
        self.clock.elapsed(self.time.now_millis())
    }

    /// Actions are forwarded only in these states
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.state(),
            ExecutableState::Starting | ExecutableState::Started
        )
    }

    /// Snapshot of the buffered history, one record per page
    pub fn pre_recorded_actions(&self) -> Vec<RecordedPage> {
        self.pending.recorded_pages()
    }

    async fn emit(&self, action: PlaybackAction) -> Result<()> {
        if !self.is_streaming() {
            return Ok(());
        }

        match &self.consumer {
            Some(consumer) => consumer.consume(action).await,
            None => {
                debug!("No action consumer, dropping {:?}", action);
                Ok(())
            }
        }
    }

    async fn emit_logged(&self, action: PlaybackAction) {
        if let Err(e) = self.emit(action).await {
            warn!("Send action failed: {}", e);
        }
    }

    /// Page the next presenter action belongs to
    fn target_page(&self) -> Option<PageRef> {
        self.pending_page
            .or_else(|| self.documents.selected().map(|doc| doc.current_page_ref()))
    }

    /// Buffer a presenter action and forward it while streaming
    pub async fn on_presenter_action(&mut self, action: PresenterAction) {
        let Some(page) = self.target_page() else {
            warn!("Dropping presenter action {:?}, no page selected", action.kind);
            return;
        };

        let playback = PlaybackAction::PagePlayback {
            page,
            action,
            timestamp: self.elapsed(),
        };

        self.pending.push(page, playback.clone());
        self.emit_logged(playback).await;
    }

    pub async fn on_page_event(&mut self, event: PageEvent) {
        self.pending_page = Some(event.page());
        self.emit_logged(event.to_action()).await;
    }

    pub async fn on_document_event(&mut self, event: DocumentEvent) -> Result<()> {
        if !self.is_streaming() {
            if let DocumentEvent::Closed(doc) = &event {
                let purged = self.pending.purge_document(doc.id);
                debug!("Purged {} pending pages of closed document {}", purged, doc.name);
            }
            if let DocumentEvent::Selected(doc) = &event {
                self.pending_page = Some(doc.current_page_ref());
            }
            return Ok(());
        }

        match event {
            DocumentEvent::Created(doc) => {
                let create = self.upload_document(&doc).await.map_err(|e| {
                    warn!("Upload document failed: {}", e);
                    e
                })?;
                self.emit(create).await
            }
            DocumentEvent::Closed(doc) => {
                self.pending.purge_document(doc.id);
                self.emit(PlaybackAction::DocumentClose {
                    document_id: doc.id,
                })
                .await
            }
            DocumentEvent::Selected(doc) => {
                self.pending_page = Some(doc.current_page_ref());
                self.select_document(&doc).await
            }
            DocumentEvent::Replaced { old, new } => {
                self.pending.purge_document(old.id);

                if new.kind.reshare_on_replace() {
                    self.share_document(&new).await
                } else {
                    debug!("Replaced {} without re-sharing", old.name);
                    Ok(())
                }
            }
            DocumentEvent::Changed(doc) => self.share_document(&doc).await,
        }
    }

    /// Upload `document` and select it for the audience
    pub async fn share_document(&mut self, document: &Document) -> Result<()> {
        let create = self.upload_document(document).await.map_err(|e| {
            warn!("Share document failed: {}", e);
            e
        })?;
        self.emit(create).await?;

        self.pending_page = Some(document.current_page_ref());
        self.select_document(document).await
    }

    async fn select_document(&self, document: &Document) -> Result<()> {
        self.emit(PlaybackAction::DocumentSelect {
            document_id: document.id,
        })
        .await?;
        self.emit(PlaybackAction::PageSelected {
            page: document.current_page_ref(),
        })
        .await
    }

    /// Upload a document and build its `DocumentCreate` action.
    ///
    /// Whiteboards are uploaded as a fixed-size template so the audience can
    /// follow newly created pages without another upload.
    #[instrument(skip(self, document), fields(document = %document.id))]
    async fn upload_document(&self, document: &Document) -> Result<PlaybackAction> {
        let uploader = self
            .uploader
            .as_ref()
            .ok_or_else(|| Error::Upload("No document uploader configured".to_string()))?;

        let upload = if document.is_whiteboard() {
            self.documents
                .whiteboard_template(document, WHITEBOARD_TEMPLATE_PAGES)?
        } else {
            document.clone()
        };

        let data = self.documents.serialize(&upload)?;
        let size = data.len();
        let remote_file = uploader.upload_file(&upload.file_name(), data).await?;

        info!("Uploaded {} ({} bytes) as {}", document.name, size, remote_file);

        Ok(PlaybackAction::DocumentCreate {
            document_id: document.id,
            checksum: document.id.to_string(),
            remote_file,
            title: document.name.clone(),
            kind: document.kind,
        })
    }

    async fn bootstrap(&mut self, course_id: String) -> Result<()> {
        self.emit(PlaybackAction::Init {
            course_id: course_id.clone(),
        })
        .await?;

        for document in self.documents.documents() {
            let create = self.upload_document(&document).await.map_err(|e| {
                warn!("Upload document failed: {}", e);
                e
            })?;
            self.emit(create).await?;
        }

        if let Some(selected) = self.documents.selected() {
            self.emit(PlaybackAction::DocumentSelect {
                document_id: selected.id,
            })
            .await?;

            let page = self
                .pending_page
                .filter(|page| page.document_id == selected.id)
                .unwrap_or_else(|| selected.current_page_ref());
            self.emit(PlaybackAction::PageSelected { page }).await?;
        }

        for recorded in self.pre_recorded_actions() {
            for action in recorded.actions {
                self.emit(action).await?;
            }
        }

        self.emit(PlaybackAction::Start { course_id }).await
    }
}

#[async_trait]
impl Executable for EventRecorder {
    fn facet(&self) -> &FacetState {
        &self.facet
    }

    fn facet_mut(&mut self) -> &mut FacetState {
        &mut self.facet
    }

    fn state_changed(&mut self, state: ExecutableState) {
        if let Some(events) = &self.events {
            events.publish(SessionEvent::RecordingState(state));
        }
    }

    async fn start_internal(&mut self) -> Result<()> {
        let course_id = self
            .course
            .as_ref()
            .map(|c| c.id.clone())
            .ok_or(Error::MissingCourse)?;

        let now = self.time.now_millis();
        if self.previous_state() == ExecutableState::Suspended {
            self.clock.resume(now);
        } else {
            self.clock.start(now);
        }

        info!("Starting recording for course {}", course_id);
        self.bootstrap(course_id).await
    }

    async fn suspend_internal(&mut self) -> Result<()> {
        self.clock.pause(self.time.now_millis());
        Ok(())
    }

    async fn stop_internal(&mut self) -> Result<()> {
        self.clock.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::document::DocumentKind;
    use bytes::Bytes;
    use parking_lot::Mutex;

    struct Docs {
        open: Vec<Document>,
    }

    impl DocumentSource for Docs {
        fn documents(&self) -> Vec<Document> {
            self.open.clone()
        }

        fn selected(&self) -> Option<Document> {
            self.open.first().cloned()
        }

        fn serialize(&self, _: &Document) -> Result<Bytes> {
            Ok(Bytes::from_static(b"%PDF"))
        }

        fn whiteboard_template(&self, document: &Document, pages: u32) -> Result<Document> {
            let mut template = document.clone();
            template.page_count = pages;
            template.name = format!("{}-template", document.name);
            Ok(template)
        }
    }

    #[derive(Default)]
    struct Uploads {
        names: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentUploader for Uploads {
        async fn upload_file(&self, file_name: &str, _: Bytes) -> Result<String> {
            self.names.lock().push(file_name.to_string());
            Ok(format!("remote/{}", file_name))
        }
    }

    #[derive(Default)]
    struct Sink {
        actions: Mutex<Vec<PlaybackAction>>,
    }

    #[async_trait]
    impl ActionConsumer for Sink {
        async fn consume(&self, action: PlaybackAction) -> Result<()> {
            self.actions.lock().push(action);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_requires_course() {
        let mut recorder = EventRecorder::new(Arc::new(Docs { open: vec![] }));

        let err = recorder.start().await.unwrap_err();
        assert!(matches!(err, Error::MissingCourse));
        assert_eq!(recorder.state(), ExecutableState::Error);
    }

    #[tokio::test]
    async fn test_whiteboard_uploaded_as_template() {
        let board = Document::new("Board", DocumentKind::Whiteboard, 1);
        let uploads = Arc::new(Uploads::default());
        let sink = Arc::new(Sink::default());

        let mut recorder = EventRecorder::with_time_source(
            Arc::new(Docs {
                open: vec![board.clone()],
            }),
            Arc::new(ManualClock::new(0)),
        );
        recorder.set_course(Some(Course::new("C1", "Physics")));
        recorder.set_uploader(Some(uploads.clone()));
        recorder.set_action_consumer(Some(sink.clone()));
        recorder.start().await.unwrap();

        assert_eq!(*uploads.names.lock(), vec!["Board-template.pdf".to_string()]);
        let actions = sink.actions.lock().clone();
        assert!(matches!(
            &actions[1],
            PlaybackAction::DocumentCreate { document_id, checksum, remote_file, .. }
                if *document_id == board.id
                    && *checksum == board.id.to_string()
                    && remote_file == "remote/Board-template.pdf"
        ));
    }

    #[tokio::test]
    async fn test_page_events_update_pending_page() {
        let doc = Document::new("Slides", DocumentKind::Pdf, 5);
        let mut recorder = EventRecorder::new(Arc::new(Docs { open: vec![doc.clone()] }));

        recorder.on_page_event(PageEvent::Selected(doc.page(2))).await;
        assert_eq!(recorder.pending_page(), Some(doc.page(2)));

        recorder
            .on_presenter_action(PresenterAction::new("pen", serde_json::Value::Null))
            .await;
        assert_eq!(recorder.pre_recorded_actions()[0].number, 2);
    }

    #[tokio::test]
    async fn test_closing_while_stopped_purges_pending() {
        let doc = Document::new("Slides", DocumentKind::Pdf, 5);
        let mut recorder = EventRecorder::new(Arc::new(Docs { open: vec![doc.clone()] }));

        recorder
            .on_presenter_action(PresenterAction::new("pen", serde_json::Value::Null))
            .await;
        assert_eq!(recorder.pending_actions().len(), 1);

        recorder
            .on_document_event(DocumentEvent::Closed(doc))
            .await
            .unwrap();
        assert!(recorder.pending_actions().is_empty());
    }
}
