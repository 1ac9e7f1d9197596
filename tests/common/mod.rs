#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat};
use kiosk_pageview::worker::{BBox, PageLink, PageText};
use kiosk_pageview::{Cookie, CookieJar, Worker, WorkerError, WorkerResult};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Page size the mock renders, in points.
pub const PAGE_W: f32 = 612.0;
pub const PAGE_H: f32 = 792.0;

#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub draws: Vec<(usize, f32)>,
    pub texts: Vec<(usize, f32)>,
    pub links: Vec<(usize, f32)>,
    pub searches: Vec<(usize, f32, String)>,
}

#[derive(Debug, Default)]
struct Failures {
    draw: Option<String>,
    text: Option<String>,
    links: Option<String>,
    search: Option<String>,
}

/// Scripted worker. Every request is recorded, then waits for a permit on
/// the gate, then answers from the configured payloads.
pub struct MockWorker {
    pub cookies: CookieJar,
    gate: Semaphore,
    calls: Mutex<Calls>,
    failures: Mutex<Failures>,
    text: Mutex<PageText>,
    text_at: Mutex<Vec<(f32, PageText)>>,
    text_holds: Mutex<Vec<(f32, Arc<Semaphore>)>>,
    links: Mutex<Vec<PageLink>>,
    hits: Mutex<Vec<BBox>>,
}

impl MockWorker {
    /// Requests complete as soon as they are polled.
    pub fn open() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Requests block until `release` hands out permits.
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            cookies: CookieJar::new(),
            gate: Semaphore::new(permits),
            calls: Mutex::new(Calls::default()),
            failures: Mutex::new(Failures::default()),
            text: Mutex::new(PageText::default()),
            text_at: Mutex::new(Vec::new()),
            text_holds: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            hits: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().clone()
    }

    pub fn set_text(&self, text: PageText) {
        *self.text.lock() = text;
    }

    /// Text answered for requests at `resolution`, instead of `set_text`'s.
    pub fn set_text_at(&self, resolution: f32, text: PageText) {
        self.text_at.lock().push((resolution, text));
    }

    /// Hold text requests at `resolution` until the returned gate gets a
    /// permit, on top of the shared gate.
    pub fn hold_text(&self, resolution: f32) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.text_holds.lock().push((resolution, Arc::clone(&gate)));
        gate
    }

    pub fn set_links(&self, links: Vec<PageLink>) {
        *self.links.lock() = links;
    }

    pub fn set_hits(&self, hits: Vec<BBox>) {
        *self.hits.lock() = hits;
    }

    pub fn fail_draw(&self, message: Option<&str>) {
        self.failures.lock().draw = message.map(str::to_string);
    }

    pub fn fail_links(&self, message: &str) {
        self.failures.lock().links = Some(message.to_string());
    }

    async fn pass_gate(&self) {
        self.gate.acquire().await.expect("gate closed").forget();
    }
}

/// Blank PNG of the page at `resolution` dpi.
pub fn page_png(resolution: f32) -> Vec<u8> {
    let width = (PAGE_W * resolution / 72.0).round() as u32;
    let height = (PAGE_H * resolution / 72.0).round() as u32;
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(GrayImage::new(width, height))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

#[async_trait]
impl Worker for MockWorker {
    async fn create_cookie(&self) -> WorkerResult<Cookie> {
        Ok(self.cookies.create())
    }

    fn delete_cookie(&self, cookie: &Cookie) {
        assert!(self.cookies.delete(cookie), "cookie {} released twice", cookie.id());
    }

    async fn draw_page_as_png(
        &self,
        page_index: usize,
        resolution: f32,
        cookie: &Cookie,
    ) -> WorkerResult<Option<Vec<u8>>> {
        self.calls.lock().draws.push((page_index, resolution));
        self.pass_gate().await;

        if cookie.is_aborted() {
            return Ok(None);
        }
        if let Some(message) = self.failures.lock().draw.clone() {
            return Err(WorkerError::RenderError(message));
        }
        Ok(Some(page_png(resolution)))
    }

    async fn get_page_text(&self, page_index: usize, resolution: f32) -> WorkerResult<PageText> {
        self.calls.lock().texts.push((page_index, resolution));
        self.pass_gate().await;

        let hold = self
            .text_holds
            .lock()
            .iter()
            .find(|(res, _)| *res == resolution)
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = hold {
            gate.acquire().await.expect("gate closed").forget();
        }

        if let Some(message) = self.failures.lock().text.clone() {
            return Err(WorkerError::TextError(message));
        }
        let scripted = self
            .text_at
            .lock()
            .iter()
            .find(|(res, _)| *res == resolution)
            .map(|(_, text)| text.clone());
        Ok(scripted.unwrap_or_else(|| self.text.lock().clone()))
    }

    async fn get_page_links(
        &self,
        page_index: usize,
        resolution: f32,
    ) -> WorkerResult<Vec<PageLink>> {
        self.calls.lock().links.push((page_index, resolution));
        self.pass_gate().await;

        if let Some(message) = self.failures.lock().links.clone() {
            return Err(WorkerError::RenderError(message));
        }
        Ok(self.links.lock().clone())
    }

    async fn search(
        &self,
        page_index: usize,
        resolution: f32,
        needle: &str,
    ) -> WorkerResult<Vec<BBox>> {
        self.calls
            .lock()
            .searches
            .push((page_index, resolution, needle.to_string()));
        self.pass_gate().await;

        if let Some(message) = self.failures.lock().search.clone() {
            return Err(WorkerError::TextError(message));
        }
        Ok(self.hits.lock().clone())
    }
}

/// Yield to the scheduler until `cond` holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Classes of the root's direct children, in order.
pub fn child_classes(node: &kiosk_pageview::Node) -> Vec<String> {
    node.children
        .iter()
        .map(|c| c.class.clone().unwrap_or_default())
        .collect()
}
