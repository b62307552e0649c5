/// Window commands
/// The main window is frameless, so the title bar drives these.

use tauri::Window;

#[tauri::command]
pub fn win_minimize(window: Window) {
    if let Err(e) = window.minimize() {
        log::warn!("minimize failed: {}", e);
    }
}

#[tauri::command]
pub fn win_toggle_maximize(window: Window) {
    let result = match window.is_maximized() {
        Ok(true) => window.unmaximize(),
        Ok(false) => window.maximize(),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        log::warn!("maximize toggle failed: {}", e);
    }
}

#[tauri::command]
pub fn win_is_maximized(window: Window) -> bool {
    window.is_maximized().unwrap_or(false)
}

#[tauri::command]
pub fn win_close(window: Window) {
    if let Err(e) = window.close() {
        log::warn!("close failed: {}", e);
    }
}
