//! Error types for the Studio host engines

use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("no workspace is open")]
    NoWorkspace,

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("path is outside the workspace: {}", .0.display())]
    OutsideWorkspace(PathBuf),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("the workspace root cannot be renamed or deleted")]
    RootProtected,

    #[error("{reason}: {}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start shell: {0}")]
    Spawn(String),

    #[error("terminal error: {0}")]
    Pty(String),

    #[error("assistant error: {0}")]
    Ai(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Classify an I/O failure on `path`, keeping not-found distinct.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path)
        } else {
            Error::Io { path, source }
        }
    }
}

// Commands hand errors straight to the webview, which only needs the reason text.
impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
