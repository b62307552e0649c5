//! Tree synchronizer
//! Owns the workspace root, performs file operations confined to it and
//! re-broadcasts a fresh tree after every successful mutation.

use crate::error::{Error, Result};
use crate::event::{EventSink, HostEvent};
use crate::tree::{self, TreeNode, MAX_DEPTH};
use parking_lot::RwLock;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Files above this size are not opened as editor text.
pub const MAX_READ_BYTES: u64 = 2 * 1024 * 1024;

/// Same bound the kernel applies before giving up with ELOOP.
const MAX_LINK_HOPS: usize = 40;

pub struct Workspace {
    root: RwLock<Option<PathBuf>>,
    sink: Arc<dyn EventSink>,
}

impl Workspace {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            root: RwLock::new(None),
            sink,
        }
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.root.read().clone()
    }

    /// Replace the root. On failure the previous root is kept.
    pub fn set_root(&self, path: impl AsRef<Path>) -> Result<TreeNode> {
        let path = path.as_ref();
        let root = fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
        if !root.is_dir() {
            return Err(Error::NotADirectory(root));
        }

        log::info!("workspace root set to {}", root.display());
        let tree = tree::scan(&root, MAX_DEPTH);
        *self.root.write() = Some(root);
        Ok(tree)
    }

    /// Scan `path`, or the root when none is given.
    pub fn tree(&self, path: Option<&Path>) -> Result<TreeNode> {
        let dir = match (path, self.root()) {
            (Some(path), Some(root)) => resolve_existing(&root, path)?,
            (Some(path), None) => fs::canonicalize(path).map_err(|e| Error::io(path, e))?,
            (None, Some(root)) => root,
            (None, None) => return Err(Error::NoWorkspace),
        };
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir));
        }
        Ok(tree::scan(&dir, MAX_DEPTH))
    }

    /// Resolve a UI-supplied path to a location inside the root.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let root = self.root().ok_or(Error::NoWorkspace)?;
        resolve_existing(&root, path)
    }

    pub fn read_file(&self, path: &Path) -> Result<String> {
        let path = self.resolve(path)?;
        let meta = fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
        if meta.is_dir() {
            return Err(unreadable(path, "is a directory"));
        }
        if meta.len() > MAX_READ_BYTES {
            return Err(unreadable(path, "file is too large to open"));
        }

        let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        if bytes.iter().take(1024).any(|b| *b == 0) {
            return Err(unreadable(path, "binary file"));
        }
        String::from_utf8(bytes).map_err(|_| unreadable(path, "not valid UTF-8 text"))
    }

    /// Create missing parent directories, then overwrite the file.
    pub fn write_file(&self, path: &Path, content: &str) -> Result<PathBuf> {
        self.mutate(|root| {
            let path = resolve(root, path)?;
            ensure_target_inside(root, &path)?;
            if path == root {
                return Err(Error::RootProtected);
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
            Ok(path)
        })
    }

    /// Recursive and idempotent.
    pub fn make_dir(&self, path: &Path) -> Result<PathBuf> {
        self.mutate(|root| {
            let path = resolve(root, path)?;
            ensure_target_inside(root, &path)?;
            fs::create_dir_all(&path).map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.clone()),
                _ => Error::io(&path, e),
            })?;
            Ok(path)
        })
    }

    /// Rename within the same parent directory. Returns the new path.
    pub fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf> {
        let new_name = validate_name(new_name)?;
        self.mutate(|root| {
            let from = resolve(root, path)?;
            if from == root {
                return Err(Error::RootProtected);
            }
            fs::symlink_metadata(&from).map_err(|e| Error::io(&from, e))?;

            let parent = from.parent().ok_or(Error::RootProtected)?;
            let to = parent.join(new_name);
            if to == from {
                return Ok(to);
            }
            if fs::symlink_metadata(&to).is_ok() {
                return Err(Error::AlreadyExists(to));
            }
            fs::rename(&from, &to).map_err(|e| Error::io(&from, e))?;
            log::debug!("renamed {} -> {}", from.display(), to.display());
            Ok(to)
        })
    }

    /// Remove a file, or a directory recursively.
    pub fn delete(&self, path: &Path) -> Result<()> {
        self.mutate(|root| {
            let path = resolve(root, path)?;
            if path == root {
                return Err(Error::RootProtected);
            }
            let meta = fs::symlink_metadata(&path).map_err(|e| Error::io(&path, e))?;
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.map_err(|e| Error::io(&path, e))
        })
    }

    /// Run a mutation against the current root; broadcast only if it succeeded.
    fn mutate<T>(&self, op: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let root = self.root().ok_or(Error::NoWorkspace)?;
        match op(&root) {
            Ok(value) => {
                self.broadcast();
                Ok(value)
            }
            Err(e) => {
                log::warn!("file operation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Push a fresh snapshot of the root to observers.
    pub fn broadcast(&self) {
        if let Some(root) = self.root() {
            let tree = tree::scan(&root, MAX_DEPTH);
            self.sink.emit(HostEvent::TreeUpdated { root, tree });
        }
    }
}

fn unreadable(path: PathBuf, reason: &str) -> Error {
    Error::Unreadable {
        path,
        reason: reason.to_string(),
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.is_empty()
        || name.trim() != name
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Lexically normalize `path` (relative paths are taken from `root`), then
/// canonicalize its deepest existing parent so symlinked directories cannot
/// lead outside `root`. The final component itself is not followed.
fn resolve(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let normalized = normalize(&joined);
    if !normalized.starts_with(root) {
        return Err(Error::OutsideWorkspace(path.to_path_buf()));
    }
    if normalized == root {
        return Ok(root.to_path_buf());
    }

    let mut pending = Vec::new();
    let mut ancestor = normalized.as_path();
    let resolved = loop {
        let Some(parent) = ancestor.parent() else {
            return Err(Error::OutsideWorkspace(path.to_path_buf()));
        };
        pending.push(ancestor.file_name().unwrap_or_default().to_os_string());
        match fs::canonicalize(parent) {
            Ok(mut base) => {
                for part in pending.iter().rev() {
                    base.push(part);
                }
                break base;
            }
            Err(_) => ancestor = parent,
        }
    };

    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(Error::OutsideWorkspace(path.to_path_buf()))
    }
}

/// Like [`resolve`], but the path must exist and, if it is a link, its
/// target must stay inside `root` too.
fn resolve_existing(root: &Path, path: &Path) -> Result<PathBuf> {
    let resolved = resolve(root, path)?;
    let canonical = fs::canonicalize(&resolved).map_err(|e| Error::io(&resolved, e))?;
    if !canonical.starts_with(root) {
        return Err(Error::OutsideWorkspace(path.to_path_buf()));
    }
    Ok(resolved)
}

/// Follow `path` while it is a symlink and fail if any hop, dangling or
/// not, points outside `root`.
fn ensure_target_inside(root: &Path, path: &Path) -> Result<()> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            _ => return Ok(()),
        }
        let target = fs::read_link(&current).map_err(|e| Error::io(&current, e))?;
        let target = match current.parent() {
            Some(parent) => parent.join(target),
            None => target,
        };
        current =
            resolve(root, &target).map_err(|_| Error::OutsideWorkspace(path.to_path_buf()))?;
    }
    Err(Error::OutsideWorkspace(path.to_path_buf()))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
