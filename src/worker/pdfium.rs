//! Worker implementation using pdfium-render.
//!
//! Note: pdfium-render's Pdfium struct is not Send+Sync, so we bind PDFium
//! on-demand inside each operation and run the whole operation on Tokio's
//! blocking pool. Only the document bytes are shared between calls.

use super::{
    BBox, BlockKind, Cookie, CookieJar, FontInfo, PageLink, PageText, TextBlock, TextLine,
    Worker, WorkerError, WorkerResult,
};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    /// Page index (0-based)
    pub index: usize,
    /// Page width in PDF points
    pub width: f32,
    /// Page height in PDF points
    pub height: f32,
    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
}

/// Document metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub pdf_version: String,
}

/// Library locations tried in order before falling back to the system library.
fn candidate_libraries() -> Vec<std::path::PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            // Contents/MacOS/kiosk -> Contents/Frameworks/libpdfium.dylib
            #[cfg(target_os = "macos")]
            candidates.push(exe_dir.join("..").join("Frameworks").join("libpdfium.dylib"));
            #[cfg(target_os = "windows")]
            candidates.push(exe_dir.join("pdfium.dll"));
            #[cfg(target_os = "linux")]
            candidates.push(exe_dir.join("libpdfium.so"));
        }
    }

    #[cfg(target_os = "macos")]
    candidates.push("/usr/local/lib/libpdfium.dylib".into());

    candidates
}

fn bind_pdfium() -> WorkerResult<Pdfium> {
    for path in candidate_libraries() {
        if !path.exists() {
            continue;
        }
        match Pdfium::bind_to_library(&path) {
            Ok(bindings) => {
                debug!(library = %path.display(), "bound bundled PDFium");
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => warn!(library = %path.display(), error = ?e, "failed to bind PDFium"),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| WorkerError::InitError(format!("could not load the PDFium library: {e:?}")))
}

/// Load the document, fetch one page and hand it to `f`.
fn with_page<T>(
    bytes: &[u8],
    page_index: usize,
    f: impl FnOnce(&PdfPage) -> WorkerResult<T>,
) -> WorkerResult<T> {
    let pdfium = bind_pdfium()?;
    let doc = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| WorkerError::LoadError(e.to_string()))?;

    let index = u16::try_from(page_index).map_err(|_| WorkerError::InvalidPage(page_index))?;
    let page = doc
        .pages()
        .get(index)
        .map_err(|_| WorkerError::InvalidPage(page_index))?;

    f(&page)
}

fn rotation_degrees(page: &PdfPage) -> i32 {
    match page.rotation() {
        Ok(PdfPageRenderRotation::None) | Err(_) => 0,
        Ok(PdfPageRenderRotation::Degrees90) => 90,
        Ok(PdfPageRenderRotation::Degrees180) => 180,
        Ok(PdfPageRenderRotation::Degrees270) => 270,
    }
}

/// Render a page to PNG bytes, polling `cookie` between stages.
pub fn render_page_to_png(
    bytes: &[u8],
    page_index: usize,
    resolution: f32,
    cookie: &Cookie,
) -> WorkerResult<Option<Vec<u8>>> {
    if cookie.is_aborted() {
        return Ok(None);
    }

    with_page(bytes, page_index, |page| {
        if cookie.is_aborted() {
            return Ok(None);
        }

        let scale = resolution / 72.0;
        let width = ((page.width().value * scale).round() as i32).max(1);
        let height = ((page.height().value * scale).round() as i32).max(1);

        let config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_target_height(height)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| WorkerError::RenderError(e.to_string()))?;

        if cookie.is_aborted() {
            return Ok(None);
        }

        let mut png_bytes = Vec::new();
        bitmap
            .as_image()
            .write_to(&mut Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| WorkerError::ImageError(e.to_string()))?;

        Ok(Some(png_bytes))
    })
}

/// Glyph box in device pixels, top-down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Bounds {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// One PDFium character, already converted to device pixels.
#[derive(Debug, Clone)]
pub(crate) enum Glyph {
    Char {
        text: String,
        /// Missing for glyphs without ink (spaces)
        bounds: Option<Bounds>,
        size: f32,
        font_name: String,
    },
    LineBreak,
}

struct LineBuilder {
    text: String,
    bounds: Option<Bounds>,
    size: f32,
    font_name: String,
}

impl LineBuilder {
    fn finish(self) -> Option<TextLine> {
        let bounds = self.bounds?;
        if self.text.trim().is_empty() {
            return None;
        }
        Some(TextLine {
            bbox: BBox::new(
                bounds.left,
                bounds.top,
                bounds.right - bounds.left,
                bounds.bottom - bounds.top,
            ),
            y: bounds.bottom,
            font: font_info(&self.font_name, self.size),
            text: self.text.trim_end().to_string(),
        })
    }
}

/// Group characters into lines. A line ends at a generated line break or
/// when the baseline moves by more than half the font size.
pub(crate) fn group_lines(glyphs: impl IntoIterator<Item = Glyph>) -> Vec<TextLine> {
    let mut lines = Vec::new();
    let mut current: Option<LineBuilder> = None;

    for glyph in glyphs {
        let (text, bounds, size, font_name) = match glyph {
            Glyph::LineBreak => {
                lines.extend(current.take().and_then(LineBuilder::finish));
                continue;
            }
            Glyph::Char { text, bounds, size, font_name } => (text, bounds, size, font_name),
        };

        let breaks_line = match (&current, bounds) {
            (Some(line), Some(b)) => line
                .bounds
                .map(|lb| (b.bottom - lb.bottom).abs() > line.size.max(size) * 0.5)
                .unwrap_or(false),
            _ => false,
        };
        if breaks_line {
            lines.extend(current.take().and_then(LineBuilder::finish));
        }

        let line = current.get_or_insert_with(|| LineBuilder {
            text: String::new(),
            bounds: None,
            size,
            font_name: font_name.clone(),
        });
        line.text.push_str(&text);
        line.size = line.size.max(size);
        if let Some(b) = bounds {
            line.bounds = Some(match line.bounds {
                Some(lb) => Bounds {
                    left: lb.left.min(b.left),
                    top: lb.top.min(b.top),
                    right: lb.right.max(b.right),
                    bottom: lb.bottom.max(b.bottom),
                },
                None => b,
            });
        }
    }

    lines.extend(current.take().and_then(LineBuilder::finish));
    lines
}

/// Map a PDF font name such as `ABCDEF+Helvetica-BoldOblique` to CSS font properties.
pub(crate) fn font_info(font_name: &str, size: f32) -> FontInfo {
    let base = font_name.split_once('+').map(|(_, rest)| rest).unwrap_or(font_name);
    let lower = base.to_ascii_lowercase();
    let family = base
        .split(|c| c == '-' || c == ',')
        .next()
        .filter(|f| !f.is_empty())
        .unwrap_or("sans-serif")
        .to_string();

    FontInfo {
        size,
        family,
        weight: if lower.contains("bold") { "bold" } else { "normal" }.to_string(),
        style: if lower.contains("italic") || lower.contains("oblique") {
            "italic"
        } else {
            "normal"
        }
        .to_string(),
    }
}

fn is_line_break(s: &str) -> bool {
    matches!(s, "\r" | "\n" | "\r\n")
}

/// Collect the page's characters as glyphs in device pixels.
fn collect_glyphs(page: &PdfPage, scale: f32) -> WorkerResult<Vec<Glyph>> {
    let text_page = page
        .text()
        .map_err(|e| WorkerError::TextError(e.to_string()))?;
    let page_height = page.height().value;

    let mut glyphs = Vec::new();
    for char_obj in text_page.chars().iter() {
        let Some(text) = char_obj.unicode_string() else {
            continue;
        };
        if is_line_break(&text) {
            glyphs.push(Glyph::LineBreak);
            continue;
        }

        let bounds = char_obj
            .tight_bounds()
            .ok()
            .filter(|r| r.width().value > 0.0 && r.height().value > 0.0)
            .map(|r| {
                let left = r.left().value;
                let top = r.top().value;
                // PDF coordinates are bottom-up, convert to top-down
                Bounds {
                    left: left * scale,
                    top: (page_height - top) * scale,
                    right: (left + r.width().value) * scale,
                    bottom: (page_height - top + r.height().value) * scale,
                }
            });

        glyphs.push(Glyph::Char {
            text,
            bounds,
            size: char_obj.scaled_font_size().value * scale,
            font_name: char_obj.font_name(),
        });
    }

    Ok(glyphs)
}

pub fn extract_page_text(
    bytes: &[u8],
    page_index: usize,
    resolution: f32,
) -> WorkerResult<PageText> {
    with_page(bytes, page_index, |page| {
        let lines = group_lines(collect_glyphs(page, resolution / 72.0)?);
        Ok(PageText {
            blocks: vec![TextBlock {
                kind: BlockKind::Text,
                lines,
            }],
        })
    })
}

/// Keep only hrefs a viewer can follow.
pub(crate) fn normalize_href(raw: &str) -> Option<String> {
    let url = url::Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https" | "mailto" | "ftp").then(|| url.to_string())
}

fn link_href(link: &PdfLink) -> Option<String> {
    if let Some(PdfAction::Uri(action)) = link.action() {
        return action.uri().ok().and_then(|uri| normalize_href(&uri));
    }
    link.destination()
        .and_then(|dest| dest.page_index().ok())
        .map(|index| format!("#page{}", index))
}

pub fn extract_page_links(
    bytes: &[u8],
    page_index: usize,
    resolution: f32,
) -> WorkerResult<Vec<PageLink>> {
    with_page(bytes, page_index, |page| {
        let scale = resolution / 72.0;
        let page_height = page.height().value;

        let mut links = Vec::new();
        for link in page.links().iter() {
            let Some(href) = link_href(&link) else {
                continue;
            };
            let Ok(rect) = link.rect() else {
                continue;
            };
            links.push(PageLink {
                href,
                x: rect.left().value * scale,
                y: (page_height - rect.top().value) * scale,
                w: rect.width().value * scale,
                h: rect.height().value * scale,
            });
        }
        Ok(links)
    })
}

/// Non-overlapping occurrences of `needle` in `haystack`, at most `limit`.
pub(crate) fn find_matches(haystack: &[char], needle: &[char], limit: usize) -> Vec<Range<usize>> {
    let mut matches = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return matches;
    }

    let mut start = 0;
    while start + needle.len() <= haystack.len() && matches.len() < limit {
        if haystack[start..start + needle.len()] == *needle {
            matches.push(start..start + needle.len());
            start += needle.len();
        } else {
            start += 1;
        }
    }
    matches
}

/// Merge adjacent glyph boxes on the same line into single boxes.
pub(crate) fn merge_text_rects(rects: Vec<BBox>, tolerance: f32) -> Vec<BBox> {
    let mut merged: Vec<BBox> = Vec::new();

    for rect in rects {
        match merged.last_mut() {
            Some(current) if (rect.y - current.y).abs() < tolerance => {
                let right = (rect.x + rect.w).max(current.x + current.w);
                let bottom = (rect.y + rect.h).max(current.y + current.h);
                current.x = current.x.min(rect.x);
                current.w = right - current.x;
                current.h = bottom - current.y;
            }
            _ => merged.push(rect),
        }
    }

    merged
}

pub fn search_page(
    bytes: &[u8],
    page_index: usize,
    resolution: f32,
    needle: &str,
    max_hits: usize,
) -> WorkerResult<Vec<BBox>> {
    with_page(bytes, page_index, |page| {
        let scale = resolution / 72.0;

        // One haystack char per glyph so match ranges index straight into `boxes`
        let mut haystack = Vec::new();
        let mut boxes = Vec::new();
        for glyph in collect_glyphs(page, scale)? {
            match glyph {
                Glyph::LineBreak => {
                    haystack.push(' ');
                    boxes.push(None);
                }
                Glyph::Char { text, bounds, .. } => {
                    haystack.push(text.chars().flat_map(char::to_lowercase).next().unwrap_or(' '));
                    boxes.push(bounds);
                }
            }
        }
        let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();

        let hits = find_matches(&haystack, &needle, max_hits)
            .into_iter()
            .flat_map(|range| {
                let rects = boxes[range]
                    .iter()
                    .flatten()
                    .map(|b| BBox::new(b.left, b.top, b.right - b.left, b.bottom - b.top))
                    .collect();
                merge_text_rects(rects, 2.0 * scale)
            })
            .collect();
        Ok(hits)
    })
}

/// Document engine backed by PDFium.
pub struct PdfiumWorker {
    bytes: Arc<Vec<u8>>,
    cookies: CookieJar,
    max_search_hits: usize,
}

impl PdfiumWorker {
    /// Load a PDF from a file path.
    pub fn open(path: impl AsRef<Path>) -> WorkerResult<(Self, DocumentInfo)> {
        let bytes =
            std::fs::read(path.as_ref()).map_err(|e| WorkerError::LoadError(e.to_string()))?;
        Self::from_bytes(bytes)
    }

    /// Load a PDF from bytes (e.g., from drag-and-drop).
    pub fn from_bytes(bytes: Vec<u8>) -> WorkerResult<(Self, DocumentInfo)> {
        let info = document_info(&bytes)?;
        info!(pages = info.page_count, version = %info.pdf_version, "opened document");
        let worker = Self {
            bytes: Arc::new(bytes),
            cookies: CookieJar::new(),
            max_search_hits: 500,
        };
        Ok((worker, info))
    }

    pub fn with_max_search_hits(mut self, max_search_hits: usize) -> Self {
        self.max_search_hits = max_search_hits;
        self
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Size and rotation of every page.
    pub fn page_infos(&self) -> WorkerResult<Vec<PageInfo>> {
        let pdfium = bind_pdfium()?;
        let doc = pdfium
            .load_pdf_from_byte_slice(&self.bytes, None)
            .map_err(|e| WorkerError::LoadError(e.to_string()))?;

        doc.pages()
            .iter()
            .enumerate()
            .map(|(index, page)| {
                Ok(PageInfo {
                    index,
                    width: page.width().value,
                    height: page.height().value,
                    rotation: rotation_degrees(&page),
                })
            })
            .collect()
    }

    async fn run_blocking<T, F>(&self, f: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&[u8]) -> WorkerResult<T> + Send + 'static,
    {
        let bytes = Arc::clone(&self.bytes);
        tokio::task::spawn_blocking(move || f(&bytes))
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))?
    }
}

fn document_info(bytes: &[u8]) -> WorkerResult<DocumentInfo> {
    let pdfium = bind_pdfium()?;
    let doc = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| WorkerError::LoadError(e.to_string()))?;

    let metadata = doc.metadata();
    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_string());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_string());

    Ok(DocumentInfo {
        page_count: doc.pages().len() as usize,
        title,
        author,
        pdf_version: format!("{:?}", doc.version()),
    })
}

#[async_trait]
impl Worker for PdfiumWorker {
    async fn create_cookie(&self) -> WorkerResult<Cookie> {
        Ok(self.cookies.create())
    }

    fn delete_cookie(&self, cookie: &Cookie) {
        if !self.cookies.delete(cookie) {
            warn!(cookie = cookie.id(), "cookie released twice");
        }
    }

    async fn draw_page_as_png(
        &self,
        page_index: usize,
        resolution: f32,
        cookie: &Cookie,
    ) -> WorkerResult<Option<Vec<u8>>> {
        let cookie = cookie.clone();
        self.run_blocking(move |bytes| render_page_to_png(bytes, page_index, resolution, &cookie))
            .await
    }

    async fn get_page_text(&self, page_index: usize, resolution: f32) -> WorkerResult<PageText> {
        self.run_blocking(move |bytes| extract_page_text(bytes, page_index, resolution))
            .await
    }

    async fn get_page_links(
        &self,
        page_index: usize,
        resolution: f32,
    ) -> WorkerResult<Vec<PageLink>> {
        self.run_blocking(move |bytes| extract_page_links(bytes, page_index, resolution))
            .await
    }

    async fn search(
        &self,
        page_index: usize,
        resolution: f32,
        needle: &str,
    ) -> WorkerResult<Vec<BBox>> {
        let needle = needle.to_string();
        let max_hits = self.max_search_hits;
        self.run_blocking(move |bytes| {
            search_page(bytes, page_index, resolution, &needle, max_hits)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(text: &str, left: f32, bottom: f32) -> Glyph {
        Glyph::Char {
            text: text.to_string(),
            bounds: Some(Bounds { left, top: bottom - 10.0, right: left + 6.0, bottom }),
            size: 12.0,
            font_name: "ABCDEF+Times-Bold".to_string(),
        }
    }

    #[test]
    fn test_merge_text_rects() {
        let rects = vec![
            BBox::new(0.0, 10.0, 10.0, 12.0),
            BBox::new(10.0, 10.0, 10.0, 12.0),
            BBox::new(20.0, 10.0, 10.0, 12.0),
            BBox::new(0.0, 30.0, 10.0, 12.0),
        ];

        let merged = merge_text_rects(rects, 2.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].w, 30.0);
        assert_eq!(merged[1], BBox::new(0.0, 30.0, 10.0, 12.0));
    }

    #[test]
    fn test_group_lines_on_baseline_and_breaks() {
        let glyphs = vec![
            glyph("H", 0.0, 20.0),
            glyph("i", 6.0, 20.0),
            Glyph::Char {
                text: " ".to_string(),
                bounds: None,
                size: 12.0,
                font_name: String::new(),
            },
            glyph("!", 18.0, 20.0),
            glyph("N", 0.0, 40.0),
            Glyph::LineBreak,
            glyph("x", 0.0, 60.0),
        ];

        let lines = group_lines(glyphs);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "Hi !");
        assert_eq!(lines[0].bbox, BBox::new(0.0, 10.0, 24.0, 10.0));
        assert_eq!(lines[0].y, 20.0);
        assert_eq!(lines[0].font.family, "Times");
        assert_eq!(lines[0].font.weight, "bold");
        assert_eq!(lines[1].text, "N");
        assert_eq!(lines[2].text, "x");
    }

    #[test]
    fn test_font_info_from_name() {
        let font = font_info("Helvetica-Oblique", 9.0);
        assert_eq!(font.family, "Helvetica");
        assert_eq!(font.style, "italic");
        assert_eq!(font.weight, "normal");
        assert_eq!(font_info("", 9.0).family, "sans-serif");
    }

    #[test]
    fn test_find_matches_non_overlapping() {
        let haystack: Vec<char> = "the fox saw a foxfox".chars().collect();
        let needle: Vec<char> = "fox".chars().collect();

        assert_eq!(find_matches(&haystack, &needle, 10), vec![4..7, 14..17, 17..20]);
        assert_eq!(find_matches(&haystack, &needle, 1), vec![4..7]);
        assert!(find_matches(&haystack, &[], 10).is_empty());
    }

    #[test]
    fn test_normalize_href() {
        assert_eq!(
            normalize_href(" https://example.com/a ").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(normalize_href("mailto:a@b.c").as_deref(), Some("mailto:a@b.c"));
        assert_eq!(normalize_href("javascript:alert(1)"), None);
        assert_eq!(normalize_href("not a url"), None);
    }
}
