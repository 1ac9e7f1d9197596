//! One page of the viewer: its node subtree and the four loads feeding it.
//!
//! `render()` starts four independent loads against the worker:
//! - image: PNG raster, cancellable through a cookie, memoized on dpi, and
//!   superseded by queueing (a render requested while one is running waits
//!   in a single last-write-wins slot)
//! - text: positioned spans, letter-spaced to the source line widths
//! - links: positioned anchors
//! - search: positioned hit boxes, only for a non-empty needle
//!
//! Every load builds its node off-tree and swaps it into the root in one
//! step. Completions are checked against the page's generation (bumped by
//! `clear()`) and, for the overlays, against the latest request ticket, so a
//! late result never lands on a cleared or newer page.

use crate::config::{zoom_to_dpi, ViewerConfig};
use crate::error::ViewerError;
use crate::view::layout::{fit_spans, AverageAdvance, TextMeasurer};
use crate::view::node::{Node, Style, Tag};
use crate::worker::{BBox, BlockKind, Cookie, CookieLease, PageLink, PageText, Worker};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};

pub const PAGE_CLASS: &str = "page";
pub const ANCHOR_CLASS: &str = "anchor";
pub const IMAGE_CLASS: &str = "image";
pub const TEXT_CLASS: &str = "text";
pub const LINKS_CLASS: &str = "links";
pub const SEARCH_HITS_CLASS: &str = "searchHitList";
pub const SEARCH_HIT_CLASS: &str = "searchHit";
pub const ERROR_CLASS: &str = "error";

/// Order of the root's children.
const LAYER_ORDER: [&str; 6] = [
    ANCHOR_CLASS,
    IMAGE_CLASS,
    TEXT_CLASS,
    LINKS_CLASS,
    SEARCH_HITS_CLASS,
    ERROR_CLASS,
];

/// Nominal page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub w: f32,
    pub h: f32,
}

/// Parameters of an image render. Two renders with equal args produce the
/// same image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderArgs {
    pub dpi: u32,
}

/// Called with the page index after the page's tree changed.
pub type ChangeListener = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlay {
    Text,
    Links,
    SearchHits,
}

impl Overlay {
    fn class(self) -> &'static str {
        match self {
            Overlay::Text => TEXT_CLASS,
            Overlay::Links => LINKS_CLASS,
            Overlay::SearchHits => SEARCH_HITS_CLASS,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
struct ImageSlot {
    /// REQUESTING marker
    in_flight: bool,
    /// Cookie of the running draw, once the worker handed one out
    cookie: Option<Cookie>,
    queued: Option<RenderArgs>,
    applied: Option<RenderArgs>,
}

#[derive(Debug, Default, Clone, Copy)]
struct OverlaySlot {
    /// Latest request issued; older completions are dropped
    ticket: u64,
    in_flight: bool,
}

struct PageState {
    root: Node,
    size: PageSize,
    dpi: u32,
    generation: u64,
    image: ImageSlot,
    overlays: [OverlaySlot; 3],
    search_needle: Option<String>,
    last_search_needle: Option<String>,
    running: usize,
}

struct DecodedImage {
    width: u32,
    height: u32,
    src: String,
}

enum ImageOutcome {
    Applied,
    Aborted,
    Failed(ViewerError),
    Stale,
}

struct Shared {
    worker: Arc<dyn Worker>,
    page_index: usize,
    config: ViewerConfig,
    measurer: Arc<dyn TextMeasurer>,
    state: Mutex<PageState>,
    idle: Notify,
    listener: RwLock<Option<ChangeListener>>,
}

/// Counts a load as running until dropped.
struct Running(Arc<Shared>);

impl Running {
    fn start(shared: &Arc<Shared>) -> Self {
        shared.state.lock().running += 1;
        Self(Arc::clone(shared))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let now_idle = {
            let mut state = self.0.state.lock();
            state.running -= 1;
            state.running == 0
        };
        if now_idle {
            self.0.idle.notify_waiters();
        }
    }
}

fn spawn_load<F, Fut>(shared: &Arc<Shared>, load: F)
where
    F: FnOnce(Arc<Shared>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let running = Running::start(shared);
    let task = load(Arc::clone(shared));
    tokio::spawn(async move {
        let _running = running;
        task.await;
    });
}

/// Put `node` in place of the root child with `class`, or at its slot in
/// [`LAYER_ORDER`] when there is none yet.
fn swap_layer(root: &mut Node, class: &str, node: Node) {
    let rank = |class: &str| {
        LAYER_ORDER
            .iter()
            .position(|l| *l == class)
            .unwrap_or(LAYER_ORDER.len())
    };
    let own = rank(class);
    let position = root
        .children
        .iter()
        .take_while(|c| rank(c.class.as_deref().unwrap_or_default()) < own)
        .count();
    root.swap_child(class, node, position);
}

fn error_node(err: &ViewerError) -> Node {
    Node::div(ERROR_CLASS).with_text(err.display_text())
}

fn page_box(size: PageSize, dpi: u32) -> (f32, f32) {
    (size.w * dpi as f32 / 72.0, size.h * dpi as f32 / 72.0)
}

fn decode_png(bytes: &[u8]) -> Result<DecodedImage, ViewerError> {
    let reader = image::ImageReader::with_format(Cursor::new(bytes), image::ImageFormat::Png);
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ViewerError::ImageDecode(e.to_string()))?;

    Ok(DecodedImage {
        width,
        height,
        src: format!("data:image/png;base64,{}", STANDARD.encode(bytes)),
    })
}

impl Shared {
    fn resolution(&self, dpi: u32) -> f32 {
        dpi as f32 * self.config.device_pixel_ratio
    }

    /// Device pixels from the worker to CSS pixels.
    fn css(&self, device: f32) -> f32 {
        device / self.config.device_pixel_ratio
    }

    fn css_box(&self, b: BBox) -> Style {
        Style::boxed(self.css(b.x), self.css(b.y), self.css(b.w), self.css(b.h))
    }

    fn notify_changed(&self) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(self.page_index);
        }
    }

    fn load_image(shared: &Arc<Self>, args: RenderArgs) {
        let generation = {
            let mut state = shared.state.lock();
            if state.image.in_flight {
                trace!(page = shared.page_index, dpi = args.dpi, "render queued");
                state.image.queued = Some(args);
                return;
            }
            if state.image.applied == Some(args) {
                trace!(page = shared.page_index, dpi = args.dpi, "image up to date");
                return;
            }
            state.image.in_flight = true;
            state.generation
        };

        spawn_load(shared, move |shared| shared.run_image(args, generation));
    }

    async fn run_image(self: Arc<Self>, first: RenderArgs, generation: u64) {
        let mut args = first;
        loop {
            let fetched = self.fetch_image(args, generation).await;

            let outcome = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    ImageOutcome::Stale
                } else {
                    state.image.in_flight = false;
                    state.image.cookie = None;
                    match fetched {
                        Ok(Some(image)) => {
                            self.apply_image(&mut state, args, image);
                            ImageOutcome::Applied
                        }
                        Ok(None) => ImageOutcome::Aborted,
                        Err(err) => ImageOutcome::Failed(err),
                    }
                }
            };

            match outcome {
                ImageOutcome::Stale => {
                    trace!(page = self.page_index, "dropping image for a cleared page");
                    return;
                }
                ImageOutcome::Failed(err) => {
                    self.show_error("load_image", &err);
                    return;
                }
                ImageOutcome::Applied => self.notify_changed(),
                ImageOutcome::Aborted => {
                    debug!(page = self.page_index, dpi = args.dpi, "render aborted");
                }
            }

            let next = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                match state.image.queued.take() {
                    Some(next) if state.image.applied != Some(next) => {
                        state.image.in_flight = true;
                        next
                    }
                    _ => return,
                }
            };
            args = next;
        }
    }

    /// Draw and decode one image. The cookie lease is released on return,
    /// whichever way this exits.
    async fn fetch_image(
        &self,
        args: RenderArgs,
        generation: u64,
    ) -> Result<Option<DecodedImage>, ViewerError> {
        let lease = CookieLease::acquire(Arc::clone(&self.worker)).await?;
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return Ok(None);
            }
            state.image.cookie = Some(lease.cookie().clone());
        }

        let resolution = self.resolution(args.dpi);
        debug!(page = self.page_index, resolution, cookie = lease.cookie().id(), "drawing page");
        let png = self
            .worker
            .draw_page_as_png(self.page_index, resolution, lease.cookie())
            .await?;

        match png {
            Some(bytes) if !bytes.is_empty() => decode_png(&bytes).map(Some),
            _ => Ok(None),
        }
    }

    fn apply_image(&self, state: &mut PageState, args: RenderArgs, image: DecodedImage) {
        let width = self.css(image.width as f32);
        let height = self.css(image.height as f32);

        let mut node = Node::new(Tag::Img).with_class(IMAGE_CLASS).with_style(Style {
            width: Some(width),
            height: Some(height),
            ..Style::default()
        });
        node.src = Some(image.src);
        node.draggable = false;

        state.root.style.width = Some(width);
        state.root.style.height = Some(height);
        swap_layer(&mut state.root, IMAGE_CLASS, node);
        state.image.applied = Some(args);
    }

    /// Take a ticket for `overlay`. Returns `(ticket, generation)`.
    fn begin(state: &mut PageState, overlay: Overlay) -> (u64, u64) {
        let generation = state.generation;
        let slot = &mut state.overlays[overlay.slot()];
        slot.ticket += 1;
        slot.in_flight = true;
        (slot.ticket, generation)
    }

    fn finish<T>(
        &self,
        overlay: Overlay,
        ticket: u64,
        generation: u64,
        result: Result<T, ViewerError>,
        apply: impl FnOnce(&Self, T) -> Node,
    ) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let slot = &mut state.overlays[overlay.slot()];
            if state.generation != generation || slot.ticket != ticket {
                trace!(page = self.page_index, ?overlay, ticket, "dropping stale result");
                return;
            }
            slot.in_flight = false;

            let layer = match result {
                Ok(value) => apply(self, value),
                Err(err) => {
                    warn!(page = self.page_index, ?overlay, error = %err, "overlay load failed");
                    let mut layer = Node::div(overlay.class());
                    layer.append_child(error_node(&err));
                    layer
                }
            };
            swap_layer(&mut state.root, overlay.class(), layer);
        }
        self.notify_changed();
    }

    fn load_text(shared: &Arc<Self>, dpi: u32) {
        let (ticket, generation) = Self::begin(&mut shared.state.lock(), Overlay::Text);

        spawn_load(shared, move |shared| async move {
            let result = shared
                .worker
                .get_page_text(shared.page_index, shared.resolution(dpi))
                .await
                .map_err(ViewerError::from);
            shared.finish(Overlay::Text, ticket, generation, result, Self::text_layer);
        });
    }

    fn text_layer(&self, text: PageText) -> Node {
        let mut spans = Vec::new();
        let mut targets = Vec::new();

        let lines = text
            .blocks
            .iter()
            .filter(|block| block.kind == BlockKind::Text)
            .flat_map(|block| &block.lines);
        for line in lines {
            let style = Style {
                left: Some(self.css(line.bbox.x)),
                top: Some(self.css(line.y - line.font.size * 0.8)),
                height: Some(self.css(line.bbox.h)),
                font_size: Some(self.css(line.font.size)),
                font_family: Some(line.font.family.clone()),
                font_weight: Some(line.font.weight.clone()),
                font_style: Some(line.font.style.clone()),
                ..Style::default()
            };
            spans.push(Node::new(Tag::Span).with_style(style).with_text(line.text.clone()));
            targets.push(self.css(line.bbox.w));
        }

        fit_spans(&mut spans, &targets, self.measurer.as_ref());

        let mut layer = Node::div(TEXT_CLASS);
        layer.replace_children(spans);
        layer
    }

    fn load_links(shared: &Arc<Self>, dpi: u32) {
        let (ticket, generation) = Self::begin(&mut shared.state.lock(), Overlay::Links);

        spawn_load(shared, move |shared| async move {
            let result = shared
                .worker
                .get_page_links(shared.page_index, shared.resolution(dpi))
                .await
                .map_err(ViewerError::from);
            shared.finish(Overlay::Links, ticket, generation, result, Self::links_layer);
        });
    }

    fn links_layer(&self, links: Vec<PageLink>) -> Node {
        let mut layer = Node::div(LINKS_CLASS);
        for link in links {
            let bounds = BBox::new(link.x, link.y, link.w, link.h);
            let mut a = Node::new(Tag::A).with_style(self.css_box(bounds));
            a.href = Some(link.href);
            layer.append_child(a);
        }
        layer
    }

    fn load_search(shared: &Arc<Self>, dpi: u32) {
        let (request, removed_hits) = {
            let mut state = shared.state.lock();
            match state.search_needle.clone().filter(|needle| !needle.is_empty()) {
                Some(needle) => {
                    state.last_search_needle = Some(needle.clone());
                    (Some((Self::begin(&mut state, Overlay::SearchHits), needle)), false)
                }
                None => {
                    // Supersede any running search and drop the old hits
                    let slot = &mut state.overlays[Overlay::SearchHits.slot()];
                    slot.ticket += 1;
                    slot.in_flight = false;
                    (None, state.root.remove_children(SEARCH_HITS_CLASS) > 0)
                }
            }
        };

        let Some(((ticket, generation), needle)) = request else {
            if removed_hits {
                shared.notify_changed();
            }
            return;
        };

        debug!(page = shared.page_index, needle = %needle, "searching page");
        spawn_load(shared, move |shared| async move {
            let result = shared
                .worker
                .search(shared.page_index, shared.resolution(dpi), &needle)
                .await
                .map_err(ViewerError::from);
            shared.finish(Overlay::SearchHits, ticket, generation, result, Self::search_layer);
        });
    }

    fn search_layer(&self, hits: Vec<BBox>) -> Node {
        let mut layer = Node::div(SEARCH_HITS_CLASS);
        for hit in hits {
            layer.append_child(Node::div(SEARCH_HIT_CLASS).with_style(self.css_box(hit)));
        }
        layer
    }

    /// Reset everything but the root box and anchor. Returns whether the
    /// tree changed.
    fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if let Some(cookie) = state.image.cookie.take() {
            cookie.abort();
        }

        let removed: usize = [IMAGE_CLASS, TEXT_CLASS, LINKS_CLASS, SEARCH_HITS_CLASS, ERROR_CLASS]
            .into_iter()
            .map(|class| state.root.remove_children(class))
            .sum();

        state.generation += 1;
        state.image = ImageSlot::default();
        state.overlays = Default::default();
        state.search_needle = None;
        state.last_search_needle = None;
        removed > 0
    }

    fn show_error(&self, context: &str, err: &ViewerError) {
        error!(page = self.page_index, context, error = %err, detail = ?err, "page failed");
        self.reset();
        {
            let mut state = self.state.lock();
            swap_layer(&mut state.root, ERROR_CLASS, error_node(err));
        }
        self.notify_changed();
    }
}

/// Handle to one page of the viewer. Clones share the same page.
#[derive(Clone)]
pub struct PageView {
    shared: Arc<Shared>,
}

impl PageView {
    /// Build the page's root node, sized for `dpi`. No worker call is made.
    pub fn new(
        worker: Arc<dyn Worker>,
        page_index: usize,
        size: PageSize,
        dpi: u32,
        config: ViewerConfig,
    ) -> Self {
        let measurer = Arc::new(AverageAdvance::default());
        Self::with_measurer(worker, page_index, size, dpi, config, measurer)
    }

    /// Like [`PageView::new`] with a custom text measurer for the text overlay.
    pub fn with_measurer(
        worker: Arc<dyn Worker>,
        page_index: usize,
        size: PageSize,
        dpi: u32,
        config: ViewerConfig,
        measurer: Arc<dyn TextMeasurer>,
    ) -> Self {
        let (width, height) = page_box(size, dpi);
        let mut root = Node::div(PAGE_CLASS).with_style(Style {
            width: Some(width),
            height: Some(height),
            ..Style::default()
        });
        root.append_child(
            Node::new(Tag::A)
                .with_class(ANCHOR_CLASS)
                .with_id(format!("page{}", page_index)),
        );

        let state = PageState {
            root,
            size,
            dpi,
            generation: 0,
            image: ImageSlot::default(),
            overlays: Default::default(),
            search_needle: None,
            last_search_needle: None,
            running: 0,
        };

        Self {
            shared: Arc::new(Shared {
                worker,
                page_index,
                config,
                measurer,
                state: Mutex::new(state),
                idle: Notify::new(),
                listener: RwLock::new(None),
            }),
        }
    }

    pub fn page_index(&self) -> usize {
        self.shared.page_index
    }

    pub fn size(&self) -> PageSize {
        self.shared.state.lock().size
    }

    /// Resolution the root box is currently sized for.
    pub fn dpi(&self) -> u32 {
        self.shared.state.lock().dpi
    }

    /// Dpi of the image currently shown, if any.
    pub fn image_dpi(&self) -> Option<u32> {
        self.shared.state.lock().image.applied.map(|args| args.dpi)
    }

    /// Whether an image render is in flight.
    pub fn is_rendering(&self) -> bool {
        self.shared.state.lock().image.in_flight
    }

    pub fn search_needle(&self) -> Option<String> {
        self.shared.state.lock().search_needle.clone()
    }

    /// Needle of the most recent search sent to the worker.
    pub fn last_search_needle(&self) -> Option<String> {
        self.shared.state.lock().last_search_needle.clone()
    }

    /// Snapshot of the page's tree, for mounting or mirroring.
    pub fn root(&self) -> Node {
        self.shared.state.lock().root.clone()
    }

    pub fn set_listener(&self, listener: ChangeListener) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Start the image, text, links and search loads at `dpi` and return.
    ///
    /// Failures are not returned; each load reports its own on the page.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn render(&self, dpi: u32) {
        let had_error = self.shared.state.lock().root.remove_children(ERROR_CLASS) > 0;
        if had_error {
            self.shared.notify_changed();
        }

        Shared::load_image(&self.shared, RenderArgs { dpi });
        Shared::load_text(&self.shared, dpi);
        Shared::load_links(&self.shared, dpi);
        Shared::load_search(&self.shared, dpi);
    }

    /// Ask the worker to abort the running image render. Text, links and
    /// search keep going. No-op when no render holds a cookie.
    pub fn cancel_render(&self) {
        if let Some(cookie) = &self.shared.state.lock().image.cookie {
            debug!(page = self.shared.page_index, cookie = cookie.id(), "cancelling render");
            cookie.abort();
        }
    }

    /// Resize the page box for a zoom percentage. Content is not re-rendered.
    pub fn set_zoom(&self, zoom_level: u32) {
        {
            let mut state = self.shared.state.lock();
            let dpi = zoom_to_dpi(zoom_level);
            let (width, height) = page_box(state.size, dpi);
            state.dpi = dpi;
            state.root.style.width = Some(width);
            state.root.style.height = Some(height);
        }
        self.shared.notify_changed();
    }

    /// Needle used by the next `render()`. `None` or empty disables search.
    pub fn set_search_needle(&self, needle: Option<&str>) {
        self.shared.state.lock().search_needle = needle.map(str::to_string);
    }

    /// Abort the image render, detach every content node and forget all
    /// in-flight work. Loads still running finish but are discarded.
    pub fn clear(&self) {
        if self.shared.reset() {
            self.shared.notify_changed();
        }
    }

    /// Log `err` and replace the page content with an error node.
    pub fn show_error(&self, context: &str, err: &ViewerError) {
        self.shared.show_error(context, err);
    }

    /// Wait until no load of this page is running.
    pub async fn idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.state.lock().running == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for PageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageView")
            .field("page_index", &self.shared.page_index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_layer_keeps_fixed_order() {
        let mut root = Node::div(PAGE_CLASS);
        root.append_child(Node::div(ANCHOR_CLASS));

        swap_layer(&mut root, SEARCH_HITS_CLASS, Node::div(SEARCH_HITS_CLASS));
        swap_layer(&mut root, TEXT_CLASS, Node::div(TEXT_CLASS));
        swap_layer(&mut root, IMAGE_CLASS, Node::div(IMAGE_CLASS));
        swap_layer(&mut root, LINKS_CLASS, Node::div(LINKS_CLASS));
        swap_layer(&mut root, TEXT_CLASS, Node::div(TEXT_CLASS).with_text("again"));

        let classes: Vec<_> = root.children.iter().filter_map(|c| c.class.as_deref()).collect();
        assert_eq!(
            classes,
            [ANCHOR_CLASS, IMAGE_CLASS, TEXT_CLASS, LINKS_CLASS, SEARCH_HITS_CLASS]
        );
        assert_eq!(root.children[2].text.as_deref(), Some("again"));
    }

    #[test]
    fn test_page_box() {
        let size = PageSize { w: 612.0, h: 792.0 };
        assert_eq!(page_box(size, 96), (816.0, 1056.0));
        assert_eq!(page_box(size, 72), (612.0, 792.0));
    }

    #[test]
    fn test_decode_png_rejects_garbage() {
        let err = decode_png(b"not a png").err().unwrap();
        assert_eq!(err.name(), "ImageDecode");
    }
}
