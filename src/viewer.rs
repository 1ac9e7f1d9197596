//! The page views of one open document.
//!
//! Only pages inside the current window are rendered; pages scrolled out of
//! it are cleared so their images and overlays can be dropped.

use crate::config::{zoom_to_dpi, ViewerConfig};
use crate::error::{Result, ViewerError};
use crate::view::{ChangeListener, PageSize, PageView};
use crate::worker::Worker;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

pub struct DocumentViewer {
    pages: Vec<PageView>,
    window: Range<usize>,
    dpi: u32,
    search_needle: Option<String>,
}

impl DocumentViewer {
    /// One page view per entry of `page_sizes`, at the configured default dpi.
    pub fn open(worker: Arc<dyn Worker>, page_sizes: &[PageSize], config: ViewerConfig) -> Self {
        let dpi = config.default_dpi;
        let pages = page_sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                PageView::new(Arc::clone(&worker), index, size, dpi, config.clone())
            })
            .collect();

        Self {
            pages,
            window: 0..0,
            dpi,
            search_needle: None,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Result<&PageView> {
        self.pages.get(index).ok_or(ViewerError::UnknownPage(index))
    }

    pub fn pages(&self) -> &[PageView] {
        &self.pages
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Pages currently kept rendered.
    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    pub fn set_listener(&self, listener: ChangeListener) {
        for page in &self.pages {
            page.set_listener(Arc::clone(&listener));
        }
    }

    /// Render the pages in `window` at `dpi` and clear the pages that left it.
    /// The window is clamped to the document.
    pub fn render_window(&mut self, window: Range<usize>, dpi: u32) -> Result<()> {
        if window.start > self.pages.len() {
            return Err(ViewerError::UnknownPage(window.start));
        }
        let window = window.start..window.end.clamp(window.start, self.pages.len());
        debug!(first = window.start, end = window.end, dpi, "rendering window");

        for page in &self.pages[self.window.clone()] {
            if !window.contains(&page.page_index()) {
                page.clear();
            }
        }

        let needle = self.search_needle.as_deref();
        for page in &self.pages[window.clone()] {
            page.set_search_needle(needle);
            page.render(dpi);
        }

        self.window = window;
        self.dpi = dpi;
        Ok(())
    }

    pub fn cancel_all(&self) {
        for page in &self.pages {
            page.cancel_render();
        }
    }

    /// Resize every page box. Call `render_window` to re-render at the new dpi.
    pub fn set_zoom(&mut self, zoom_level: u32) {
        self.dpi = zoom_to_dpi(zoom_level);
        for page in &self.pages {
            page.set_zoom(zoom_level);
        }
    }

    /// Needle for the next `render_window`, applied to every page.
    pub fn set_search_needle(&mut self, needle: Option<&str>) {
        self.search_needle = needle.map(str::to_string);
        for page in &self.pages {
            page.set_search_needle(needle);
        }
    }

    /// Clear every page. The viewer can be rendered again afterwards.
    pub fn close(&mut self) {
        for page in &self.pages {
            page.clear();
        }
        self.window = 0..0;
    }

    /// Wait until no page has a load running.
    pub async fn idle(&self) {
        for page in &self.pages {
            page.idle().await;
        }
    }
}
