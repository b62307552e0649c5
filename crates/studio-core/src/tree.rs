//! Directory scanner: path -> bounded-depth, filtered, ordered snapshot.

use serde::Serialize;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

/// Levels of children below the scanned directory.
pub const MAX_DEPTH: usize = 6;

/// Names never shown in the explorer, at any depth. Dotfiles are excluded separately.
pub const IGNORED: &[&str] = &[
    ".git",
    ".DS_Store",
    "node_modules",
    "__pycache__",
    ".cache",
    "dist",
    "build",
    "target",
    "coverage",
    ".next",
    ".nuxt",
    ".vite",
    ".turbo",
    ".nyc_output",
    "Thumbs.db",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    Directory {
        name: String,
        path: PathBuf,
        children: Vec<TreeNode>,
    },
    File {
        name: String,
        path: PathBuf,
    },
}

impl TreeNode {
    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory { name, .. } | TreeNode::File { name, .. } => name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TreeNode::Directory { path, .. } | TreeNode::File { path, .. } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, TreeNode::Directory { .. })
    }

    /// Children of a directory; empty for files.
    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Directory { children, .. } => children,
            TreeNode::File { .. } => &[],
        }
    }
}

pub fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED.contains(&name)
}

/// Snapshot `path` as a directory node. Never fails: unreadable directories,
/// including `path` itself, yield an empty children list.
pub fn scan(path: &Path, max_depth: usize) -> TreeNode {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    TreeNode::Directory {
        name,
        path: path.to_path_buf(),
        children: read_children(path, 0, max_depth),
    }
}

fn read_children(dir: &Path, depth: usize, max_depth: usize) -> Vec<TreeNode> {
    if depth >= max_depth {
        return Vec::new();
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("skipping unreadable directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut nodes: Vec<TreeNode> = entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_ignored(&name) {
                return None;
            }
            // Symlinks are not followed, so a link to a directory lists as a file.
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let path = entry.path();
            Some(if is_dir {
                let children = read_children(&path, depth + 1, max_depth);
                TreeNode::Directory {
                    name,
                    path,
                    children,
                }
            } else {
                TreeNode::File { name, path }
            })
        })
        .collect();

    nodes.sort_by(compare_nodes);
    nodes
}

fn compare_nodes(a: &TreeNode, b: &TreeNode) -> Ordering {
    match (a.is_dir(), b.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a
            .name()
            .to_lowercase()
            .cmp(&b.name().to_lowercase())
            .then_with(|| a.name().cmp(b.name())),
    }
}
