use crossbeam_channel::Receiver;
use std::thread;
use studio_core::HostEvent;
use tauri::{AppHandle, Emitter};

pub const TREE_UPDATE: &str = "fs:treeUpdate";
pub const PTY_DATA: &str = "pty:data";
pub const PTY_EXIT: &str = "pty:exit";

fn event_name(event: &HostEvent) -> &'static str {
    match event {
        HostEvent::TreeUpdated { .. } => TREE_UPDATE,
        HostEvent::TerminalOutput { .. } => PTY_DATA,
        HostEvent::TerminalExited { .. } => PTY_EXIT,
    }
}

/// Drain engine events into the webview, one stream per event name, in order.
pub fn forward(app: AppHandle, events: Receiver<HostEvent>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("host-events".to_string())
        .spawn(move || {
            for event in events.iter() {
                if let Err(e) = app.emit(event_name(&event), &event) {
                    log::warn!("failed to deliver {}: {}", event_name(&event), e);
                }
            }
            log::debug!("event forwarder stopped");
        })?;
    Ok(())
}
