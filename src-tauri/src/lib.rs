/// Studio host
/// Privileged side of the editor: owns the workspace, the shells and the
/// assistant key. The webview reaches them only through `commands`.

mod commands;
mod events;

use std::sync::Arc;
use studio_core::{AiConfig, Assistant, ChannelSink, EventSink, SessionManager, Workspace};
use tauri::RunEvent;

/// Events buffered between the engines and the webview before producers block.
const EVENT_CAPACITY: usize = 256;

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let (sink, host_events) = ChannelSink::bounded(EVENT_CAPACITY);
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let workspace = Arc::new(Workspace::new(sink.clone()));
    let sessions = Arc::new(SessionManager::new(sink));
    let sessions_for_shutdown = sessions.clone();

    let ai_config = AiConfig::from_env();
    let assistant = Assistant::new(ai_config).expect("error while creating assistant client");

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .manage(workspace)
        .manage(sessions)
        .manage(assistant)
        .setup(move |app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }
            events::forward(app.handle().clone(), host_events)?;
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::workspace::dialog_open_folder,
            commands::workspace::workspace_set,
            commands::workspace::fs_tree,
            commands::workspace::fs_read,
            commands::workspace::fs_write,
            commands::workspace::fs_mkdir,
            commands::workspace::fs_rename,
            commands::workspace::fs_delete,
            commands::workspace::shell_open,
            commands::terminal::pty_spawn,
            commands::terminal::pty_input,
            commands::terminal::pty_resize,
            commands::terminal::pty_run,
            commands::terminal::pty_stop,
            commands::terminal::pty_cd,
            commands::terminal::pty_kill,
            commands::terminal::pty_sessions,
            commands::assistant::assistant_ask,
            commands::window::win_minimize,
            commands::window::win_toggle_maximize,
            commands::window::win_is_maximized,
            commands::window::win_close,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(move |_app_handle, event| {
            if let RunEvent::Exit = event {
                // Clean up all shells on app exit
                log::info!("App shutting down - terminating terminal sessions");
                sessions_for_shutdown.kill_all();
            }
        });
}
