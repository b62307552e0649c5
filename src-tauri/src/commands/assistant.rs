/// Assistant command
/// The key stays in this process; the webview only sends text and gets text back.

use studio_core::{AskRequest, Assistant, Error};
use tauri::State;

#[tauri::command]
pub async fn assistant_ask(
    assistant: State<'_, Assistant>,
    request: AskRequest,
) -> Result<String, Error> {
    assistant.ask(&request).await.map_err(|e| {
        log::warn!("assistant request failed: {}", e);
        e
    })
}
