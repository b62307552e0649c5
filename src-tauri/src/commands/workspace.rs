/// Workspace commands
/// Folder picking, the workspace root and file operations. Mutations make the
/// workspace re-broadcast its tree as an `fs:treeUpdate` event.

use super::blocking;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use studio_core::{Error, TreeNode, Workspace};
use tauri::{AppHandle, State};
use tauri_plugin_dialog::DialogExt;
use tauri_plugin_opener::OpenerExt;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceOpened {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<TreeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Renamed {
    pub ok: bool,
    pub new_path: PathBuf,
}

/// Native folder picker. `None` when the user cancels.
#[tauri::command]
pub async fn dialog_open_folder(app: AppHandle) -> Result<Option<PathBuf>, Error> {
    blocking(move || {
        let picked = app
            .dialog()
            .file()
            .set_title("Select Workspace")
            .blocking_pick_folder();
        Ok(picked.and_then(|path| path.into_path().ok()))
    })
    .await
}

#[tauri::command]
pub async fn workspace_set(
    workspace: State<'_, Arc<Workspace>>,
    path: String,
) -> Result<WorkspaceOpened, Error> {
    let workspace = workspace.inner().clone();
    let opened = blocking(move || {
        Ok(match workspace.set_root(&path) {
            Ok(tree) => WorkspaceOpened {
                ok: true,
                root: workspace.root(),
                tree: Some(tree),
                error: None,
            },
            Err(e) => {
                log::warn!("cannot open workspace {}: {}", path, e);
                WorkspaceOpened {
                    ok: false,
                    root: None,
                    tree: None,
                    error: Some(e.to_string()),
                }
            }
        })
    })
    .await?;
    Ok(opened)
}

#[tauri::command]
pub async fn fs_tree(
    workspace: State<'_, Arc<Workspace>>,
    path: Option<String>,
) -> Result<TreeNode, Error> {
    let workspace = workspace.inner().clone();
    blocking(move || workspace.tree(path.as_deref().map(Path::new))).await
}

#[tauri::command]
pub async fn fs_read(workspace: State<'_, Arc<Workspace>>, path: String) -> Result<String, Error> {
    let workspace = workspace.inner().clone();
    blocking(move || workspace.read_file(Path::new(&path))).await
}

#[tauri::command]
pub async fn fs_write(
    workspace: State<'_, Arc<Workspace>>,
    path: String,
    content: String,
) -> Result<(), Error> {
    let workspace = workspace.inner().clone();
    blocking(move || workspace.write_file(Path::new(&path), &content).map(|_| ())).await
}

#[tauri::command]
pub async fn fs_mkdir(workspace: State<'_, Arc<Workspace>>, path: String) -> Result<(), Error> {
    let workspace = workspace.inner().clone();
    blocking(move || workspace.make_dir(Path::new(&path)).map(|_| ())).await
}

#[tauri::command]
pub async fn fs_rename(
    workspace: State<'_, Arc<Workspace>>,
    path: String,
    new_name: String,
) -> Result<Renamed, Error> {
    let workspace = workspace.inner().clone();
    blocking(move || {
        let new_path = workspace.rename(Path::new(&path), &new_name)?;
        Ok(Renamed { ok: true, new_path })
    })
    .await
}

#[tauri::command]
pub async fn fs_delete(workspace: State<'_, Arc<Workspace>>, path: String) -> Result<(), Error> {
    let workspace = workspace.inner().clone();
    blocking(move || workspace.delete(Path::new(&path))).await
}

/// Open a workspace file or folder with the OS default application.
#[tauri::command]
pub fn shell_open(
    app: AppHandle,
    workspace: State<'_, Arc<Workspace>>,
    path: String,
) -> Result<(), Error> {
    let target = workspace.resolve(Path::new(&path))?;
    app.opener()
        .open_path(target.to_string_lossy(), None::<&str>)
        .map_err(|e| Error::Task(format!("failed to open {}: {}", target.display(), e)))
}
