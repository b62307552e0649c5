//! Engines behind the Studio editor host.
//!
//! The sandboxed UI never touches the filesystem or processes itself. The host
//! exposes these components through its commands:
//! - [`tree`]: bounded-depth, filtered, ordered directory snapshots
//! - [`workspace`]: the workspace root and the file operations confined to it
//! - [`session`]: interactive shells on pseudo-terminals, one per session id
//! - [`assistant`]: the outbound chat completion proxy
//! - [`event`]: what flows back to the UI unprompted

pub mod assistant;
pub mod error;
pub mod event;
pub mod session;
pub mod tree;
pub mod workspace;

pub use assistant::{AiConfig, AskRequest, Assistant, ChatRole, ChatTurn};
pub use error::{Error, Result};
pub use event::{ChannelSink, EventSink, HostEvent};
pub use session::{SessionConfig, SessionId, SessionInfo, SessionManager};
pub use tree::TreeNode;
pub use workspace::Workspace;
