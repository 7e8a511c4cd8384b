//! Presenter-side document model
//!
//! Documents are owned by the host application. The recorder only needs
//! their identity, their kind and a way to serialize them for upload, which
//! the host provides through [`DocumentSource`].

use crate::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Whiteboard,
    Quiz { has_answers: bool },
    Message,
    Screen,
}

impl DocumentKind {
    /// Whether replacing a document of this kind re-shares it in full
    pub fn reshare_on_replace(&self) -> bool {
        match self {
            DocumentKind::Quiz { has_answers } => !has_answers,
            DocumentKind::Message | DocumentKind::Screen => true,
            DocumentKind::Pdf | DocumentKind::Whiteboard => false,
        }
    }
}

/// An open presentation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Unique id, also used as the content checksum
    pub id: Uuid,

    pub name: String,

    pub kind: DocumentKind,

    pub page_count: u32,

    /// Zero-based index of the current page
    pub current_page: u32,
}

impl Document {
    pub fn new(name: impl Into<String>, kind: DocumentKind, page_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            page_count,
            current_page: 0,
        }
    }

    pub fn is_whiteboard(&self) -> bool {
        self.kind == DocumentKind::Whiteboard
    }

    pub fn page(&self, number: u32) -> PageRef {
        PageRef {
            document_id: self.id,
            number,
        }
    }

    pub fn current_page_ref(&self) -> PageRef {
        self.page(self.current_page)
    }

    /// File name the document is uploaded under
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.name)
    }
}

/// Identity of a page independent of local object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub document_id: Uuid,
    pub number: u32,
}

/// Access to the host's open documents
pub trait DocumentSource: Send + Sync {
    /// All currently open documents, in opening order
    fn documents(&self) -> Vec<Document>;

    /// The document shown to the audience
    fn selected(&self) -> Option<Document>;

    /// Serialize a document into its uploadable byte form
    fn serialize(&self, document: &Document) -> Result<Bytes>;

    /// Clone a whiteboard into a template with a fixed number of pages
    fn whiteboard_template(&self, document: &Document, pages: u32) -> Result<Document>;
}
