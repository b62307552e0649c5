/// Terminal commands
/// One shell per terminal tab, addressed by the tab's session id.
/// Input, resize, interrupt and cd are fire-and-forget: failures are logged,
/// and directives for a session that has already exited are dropped.

use super::blocking;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use studio_core::session::fallback_dir;
use studio_core::{Error, SessionId, SessionInfo, SessionManager, Workspace};
use tauri::State;

fn start_dir(workspace: &Workspace, cwd: Option<String>) -> PathBuf {
    cwd.filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| workspace.root())
        .unwrap_or_else(fallback_dir)
}

/// Start a shell for `id`, replacing any shell it already has.
#[tauri::command]
pub async fn pty_spawn(
    sessions: State<'_, Arc<SessionManager>>,
    workspace: State<'_, Arc<Workspace>>,
    id: SessionId,
    cwd: Option<String>,
) -> Result<(), Error> {
    let sessions = sessions.inner().clone();
    let dir = start_dir(&workspace, cwd);
    blocking(move || sessions.spawn(id, &dir)).await
}

#[tauri::command]
pub fn pty_input(sessions: State<'_, Arc<SessionManager>>, id: SessionId, data: String) {
    if let Err(e) = sessions.write(id, data.as_bytes()) {
        log::warn!("terminal {}: {}", id, e);
    }
}

#[tauri::command]
pub fn pty_resize(sessions: State<'_, Arc<SessionManager>>, id: SessionId, cols: u16, rows: u16) {
    if let Err(e) = sessions.resize(id, cols, rows) {
        log::warn!("terminal {}: {}", id, e);
    }
}

/// Run a command line. Starts a shell first if the tab has none, and changes
/// into `cwd` (default: the workspace root) before running.
#[tauri::command]
pub async fn pty_run(
    sessions: State<'_, Arc<SessionManager>>,
    workspace: State<'_, Arc<Workspace>>,
    id: SessionId,
    command: String,
    cwd: Option<String>,
) -> Result<(), Error> {
    let sessions = sessions.inner().clone();
    let dir = cwd
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| workspace.root());
    let result = blocking(move || sessions.run_command(id, &command, dir.as_deref())).await;
    if let Err(e) = &result {
        log::warn!("terminal {}: {}", id, e);
    }
    result
}

#[tauri::command]
pub fn pty_stop(sessions: State<'_, Arc<SessionManager>>, id: SessionId) {
    if let Err(e) = sessions.interrupt(id) {
        log::warn!("terminal {}: {}", id, e);
    }
}

#[tauri::command]
pub fn pty_cd(sessions: State<'_, Arc<SessionManager>>, id: SessionId, path: String) {
    if let Err(e) = sessions.change_directory(id, Path::new(&path)) {
        log::warn!("terminal {}: {}", id, e);
    }
}

#[tauri::command]
pub async fn pty_kill(sessions: State<'_, Arc<SessionManager>>, id: SessionId) -> Result<(), Error> {
    let sessions = sessions.inner().clone();
    blocking(move || {
        sessions.kill(id);
        Ok(())
    })
    .await
}

#[tauri::command]
pub fn pty_sessions(sessions: State<'_, Arc<SessionManager>>) -> Vec<SessionInfo> {
    sessions.sessions()
}
