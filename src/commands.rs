//! Tauri commands driving the page views.
//!
//! The frontend owns scrolling and zoom controls; the backend owns the page
//! views. After any page changes, a `page-view-changed` event is emitted and
//! the frontend pulls the new tree with `page_snapshot`.

use crate::config::ViewerConfig;
use crate::error::{Result, ViewerError};
use crate::view::{Node, PageSize};
use crate::viewer::DocumentViewer;
use crate::worker::pdfium::{DocumentInfo, PageInfo, PdfiumWorker};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tauri::{AppHandle, Emitter, State};
use tracing::{info, warn};

pub const PAGE_VIEW_CHANGED: &str = "page-view-changed";

/// Application state holding one viewer per open document.
pub struct AppState {
    pub documents: Mutex<HashMap<String, DocumentViewer>>,
    next_id: AtomicU32,
    config: ViewerConfig,
}

impl AppState {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            config,
        }
    }

    fn generate_id(&self) -> String {
        format!("doc_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn with_viewer<T>(
        &self,
        doc_id: &str,
        f: impl FnOnce(&mut DocumentViewer) -> Result<T>,
    ) -> Result<T> {
        let mut docs = self.documents.lock();
        let viewer = docs
            .get_mut(doc_id)
            .ok_or_else(|| ViewerError::UnknownDocument(doc_id.to_string()))?;
        f(viewer)
    }
}

/// Result of opening a PDF.
#[derive(Debug, Serialize)]
pub struct LoadResult {
    /// Unique document ID for subsequent commands
    pub id: String,
    pub info: DocumentInfo,
    pub pages: Vec<PageInfo>,
}

#[derive(Debug, Clone, Serialize)]
struct PageViewChanged {
    doc_id: String,
    page: usize,
}

/// Open a PDF and create a page view per page. Nothing is rendered until
/// `render_window`.
#[tauri::command]
pub async fn open_document(
    path: String,
    app: AppHandle,
    state: State<'_, AppState>,
) -> Result<LoadResult> {
    let (worker, info) = PdfiumWorker::open(&path)?;
    let worker = worker.with_max_search_hits(state.config.max_search_hits);
    let pages = worker.page_infos()?;
    let sizes: Vec<PageSize> = pages
        .iter()
        .map(|page| PageSize {
            w: page.width,
            h: page.height,
        })
        .collect();

    let id = state.generate_id();
    let viewer = DocumentViewer::open(Arc::new(worker), &sizes, state.config.clone());

    let doc_id = id.clone();
    viewer.set_listener(Arc::new(move |page| {
        let payload = PageViewChanged {
            doc_id: doc_id.clone(),
            page,
        };
        if let Err(e) = app.emit(PAGE_VIEW_CHANGED, payload) {
            warn!(error = %e, "failed to emit page change");
        }
    }));

    info!(doc_id = %id, path = %path, pages = sizes.len(), "document opened");
    state.documents.lock().insert(id.clone(), viewer);
    Ok(LoadResult { id, info, pages })
}

/// Close a document and drop its page views.
#[tauri::command]
pub async fn close_document(doc_id: String, state: State<'_, AppState>) -> Result<()> {
    let viewer = state.documents.lock().remove(&doc_id);
    match viewer {
        Some(mut viewer) => {
            viewer.close();
            Ok(())
        }
        None => Err(ViewerError::UnknownDocument(doc_id)),
    }
}

/// Render pages `first..=last`, clearing those that scrolled out.
/// `dpi` defaults to the viewer's current zoom.
#[tauri::command]
pub async fn render_window(
    doc_id: String,
    first: usize,
    last: usize,
    dpi: Option<u32>,
    state: State<'_, AppState>,
) -> Result<()> {
    state.with_viewer(&doc_id, |viewer| {
        let dpi = dpi.unwrap_or_else(|| viewer.dpi());
        viewer.render_window(first..last.saturating_add(1), dpi)
    })
}

#[tauri::command]
pub async fn cancel_render(doc_id: String, page: usize, state: State<'_, AppState>) -> Result<()> {
    state.with_viewer(&doc_id, |viewer| {
        viewer.page(page)?.cancel_render();
        Ok(())
    })
}

/// Resize all page boxes for a zoom percentage.
#[tauri::command]
pub async fn set_zoom(doc_id: String, zoom: u32, state: State<'_, AppState>) -> Result<()> {
    state.with_viewer(&doc_id, |viewer| {
        viewer.set_zoom(zoom);
        Ok(())
    })
}

/// Set the search needle and refresh the rendered window with it.
#[tauri::command]
pub async fn set_search_needle(
    doc_id: String,
    needle: Option<String>,
    state: State<'_, AppState>,
) -> Result<()> {
    state.with_viewer(&doc_id, |viewer| {
        viewer.set_search_needle(needle.as_deref());
        let (window, dpi) = (viewer.window(), viewer.dpi());
        viewer.render_window(window, dpi)
    })
}

/// Current tree of one page.
#[tauri::command]
pub async fn page_snapshot(
    doc_id: String,
    page: usize,
    state: State<'_, AppState>,
) -> Result<Node> {
    state.with_viewer(&doc_id, |viewer| Ok(viewer.page(page)?.root()))
}
