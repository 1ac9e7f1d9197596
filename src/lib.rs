// Kiosk PDF Reader - page view coordination
//
// Each visible page of a document is a `PageView`: a node tree fed by four
// asynchronous loads (page image, text overlay, links, search hits) against
// a rendering worker. The PDFium worker does the actual rendering; the
// desktop shell exposes the viewer to the WebView over Tauri IPC.

pub mod config;
pub mod error;
pub mod logging;
pub mod view;
pub mod viewer;
pub mod worker;

#[cfg(feature = "desktop")]
mod commands;

pub use config::ViewerConfig;
pub use error::{Result, ViewerError};
pub use view::{Node, PageSize, PageView, RenderArgs};
pub use viewer::DocumentViewer;
pub use worker::{Cookie, CookieJar, CookieLease, Worker, WorkerError, WorkerResult};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::{
        cancel_render, close_document, open_document, page_snapshot, render_window,
        set_search_needle, set_zoom, AppState,
    };

    logging::init();
    dotenvy::dotenv().ok();
    let config = ViewerConfig::from_env();
    tracing::info!(?config, "starting Kiosk v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .manage(AppState::new(config))
        .invoke_handler(tauri::generate_handler![
            open_document,
            close_document,
            render_window,
            cancel_render,
            set_zoom,
            set_search_needle,
            page_snapshot,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
