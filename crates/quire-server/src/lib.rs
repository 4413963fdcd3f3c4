//! Preview server, live reload, and watch orchestration for quire.
//!
//! The preview server serves the built site with proxy rules and a history
//! fallback. Watch bindings rerun task sequences when matching files change
//! and then tell connected browsers to reload.

pub mod browser;
pub mod orchestrator;
pub mod reload;
pub mod server;
pub mod watcher;

pub use browser::{open_browser, select_browser};
pub use orchestrator::{
    ArmedOrchestrator, BindingRun, Reloader, WatchBinding, WatchError, WatchOrchestrator,
};
pub use reload::{client_script, LiveReload, ReloadConfig, ReloadHub, ReloadMessage};
pub use server::{
    inject_script, router, PreviewConfig, PreviewServer, ProxyRule, ProxyTarget, ServerError,
};
pub use watcher::FileWatcher;
