/// Commands module
/// The boundary between the sandboxed webview and the host. Every filesystem
/// change and every keystroke bound for a shell arrives through one of these.

pub mod assistant;
pub mod terminal;
pub mod window;
pub mod workspace;

use studio_core::{Error, Result};

/// Run blocking work off the webview's event loop.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tauri::async_runtime::spawn_blocking(work)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}
