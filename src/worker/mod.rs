//! Rendering worker interface.
//!
//! The page view never renders, shapes text or searches on its own. It talks
//! to a worker through the async [`Worker`] trait:
//! - page raster as PNG, cooperatively cancellable through a [`Cookie`]
//! - structured page text (blocks, lines, fonts)
//! - hyperlinks with their hit boxes
//! - search hits for a needle
//!
//! All coordinates returned by a worker are device pixels at the requested
//! resolution, top-left origin.

mod cookie;
pub mod pdfium;

pub use cookie::{Cookie, CookieJar, CookieLease};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to initialize PDFium: {0}")]
    InitError(String),

    #[error("Failed to load PDF: {0}")]
    LoadError(String),

    #[error("Invalid page index: {0}")]
    InvalidPage(usize),

    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error("Image encoding failed: {0}")]
    ImageError(String),

    #[error("Text extraction failed: {0}")]
    TextError(String),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl WorkerError {
    /// Short error name, shown in front of the message on a broken page.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerError::InitError(_) => "InitError",
            WorkerError::LoadError(_) => "LoadError",
            WorkerError::InvalidPage(_) => "InvalidPage",
            WorkerError::RenderError(_) => "RenderError",
            WorkerError::ImageError(_) => "ImageError",
            WorkerError::TextError(_) => "TextError",
            WorkerError::TaskFailed(_) => "TaskFailed",
        }
    }
}

impl Serialize for WorkerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Axis-aligned box in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// Font used by a line of text, in CSS terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontInfo {
    /// Font size in device pixels
    pub size: f32,
    pub family: String,
    /// `normal` or `bold`
    pub weight: String,
    /// `normal` or `italic`
    pub style: String,
}

/// One line of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub bbox: BBox,
    /// Baseline position
    pub y: f32,
    pub font: FontInfo,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub lines: Vec<TextLine>,
}

/// Structured text of one page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageText {
    pub blocks: Vec<TextBlock>,
}

/// Hyperlink hit box on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub href: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// Out-of-process (or off-thread) document engine.
///
/// `resolution` is always the effective dpi, device pixel ratio included.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Allocate a cancellation cookie for the next draw call.
    async fn create_cookie(&self) -> WorkerResult<Cookie>;

    /// Release a cookie. Called exactly once per cookie by [`CookieLease`].
    fn delete_cookie(&self, cookie: &Cookie);

    /// Render a page to PNG. `Ok(None)` (or empty bytes) means the render
    /// was aborted through the cookie.
    async fn draw_page_as_png(
        &self,
        page_index: usize,
        resolution: f32,
        cookie: &Cookie,
    ) -> WorkerResult<Option<Vec<u8>>>;

    async fn get_page_text(&self, page_index: usize, resolution: f32) -> WorkerResult<PageText>;

    async fn get_page_links(&self, page_index: usize, resolution: f32)
        -> WorkerResult<Vec<PageLink>>;

    async fn search(
        &self,
        page_index: usize,
        resolution: f32,
        needle: &str,
    ) -> WorkerResult<Vec<BBox>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_text_wire_format() {
        let json = r#"{
            "blocks": [
                { "type": "image" },
                { "type": "text", "lines": [
                    { "bbox": { "x": 10, "y": 20, "w": 100, "h": 12 },
                      "y": 30,
                      "font": { "size": 12, "family": "serif",
                                "weight": "bold", "style": "normal" },
                      "text": "Hello" }
                ] }
            ]
        }"#;

        let text: PageText = serde_json::from_str(json).unwrap();
        assert_eq!(text.blocks.len(), 2);
        assert_eq!(text.blocks[0].kind, BlockKind::Image);
        assert!(text.blocks[0].lines.is_empty());
        assert_eq!(text.blocks[1].lines[0].bbox, BBox::new(10.0, 20.0, 100.0, 12.0));
        assert_eq!(text.blocks[1].lines[0].font.weight, "bold");
    }

    #[test]
    fn test_error_name_and_serialization() {
        let err = WorkerError::RenderError("bitmap allocation failed".to_string());
        assert_eq!(err.name(), "RenderError");
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"Rendering failed: bitmap allocation failed\""
        );
    }
}
