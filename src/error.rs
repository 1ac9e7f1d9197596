use crate::worker::WorkerError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by page views and the document viewer.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Failed to decode page image: {0}")]
    ImageDecode(String),

    #[error("Document not found: {0}")]
    UnknownDocument(String),

    #[error("Invalid page index: {0}")]
    UnknownPage(usize),
}

impl ViewerError {
    /// Short error name, shown in front of the message on a broken page.
    pub fn name(&self) -> &'static str {
        match self {
            ViewerError::Worker(e) => e.name(),
            ViewerError::ImageDecode(_) => "ImageDecode",
            ViewerError::UnknownDocument(_) => "UnknownDocument",
            ViewerError::UnknownPage(_) => "UnknownPage",
        }
    }

    /// `"{name}: {message}"`, the text of an error node.
    pub fn display_text(&self) -> String {
        format!("{}: {}", self.name(), self)
    }
}

impl Serialize for ViewerError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ViewerError>;
