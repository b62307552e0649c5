//! Outbound events from the host to the UI.
//!
//! Engines never talk to the webview directly. They push [`HostEvent`]s into an
//! [`EventSink`]; the host drains them and forwards each one to the UI.

use crate::session::SessionId;
use crate::tree::TreeNode;
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostEvent {
    /// A fresh snapshot of the workspace root after a successful mutation.
    TreeUpdated { root: PathBuf, tree: TreeNode },
    /// A chunk of bytes the shell wrote, in the order it was read.
    TerminalOutput { session: SessionId, data: Vec<u8> },
    /// The shell process ended. Always the last event for its session.
    TerminalExited { session: SessionId, code: u32 },
}

pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: HostEvent);
}

/// Bounded channel sink. When the consumer falls behind, `emit` blocks the
/// producer (a PTY reader thread) rather than dropping terminal output.
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<HostEvent>,
}

impl ChannelSink {
    pub fn bounded(capacity: usize) -> (Self, Receiver<HostEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: HostEvent) {
        // A closed receiver means the host is shutting down.
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped; discarding event");
        }
    }
}
