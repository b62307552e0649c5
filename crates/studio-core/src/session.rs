//! Terminal session manager
//! One interactive shell per session id, each on its own pseudo-terminal.
//! Output and exit are pushed to the [`EventSink`] by a reader thread per session.

use crate::error::{Error, Result};
use crate::event::{EventSink, HostEvent};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Chosen by the UI, one per terminal tab.
pub type SessionId = u32;

pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;

const INTERRUPT: &[u8] = b"\x03";

#[cfg(not(windows))]
const COMMAND_SEPARATOR: &str = " && ";
#[cfg(windows)]
const COMMAND_SEPARATOR: &str = "; ";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
    pub env: Vec<(String, String)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            args: Vec::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            env: vec![
                ("TERM".to_string(), "xterm-256color".to_string()),
                ("COLORTERM".to_string(), "truecolor".to_string()),
            ],
        }
    }
}

#[cfg(windows)]
pub fn default_shell() -> String {
    "powershell.exe".to_string()
}

#[cfg(not(windows))]
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/bash".to_string())
}

/// Directory used when a shell has to be started without one.
pub fn fallback_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
}

/// State shared between a session's owner and its reader thread.
/// Whoever flips `closed` first reaps the child and emits the one exit event.
struct Lifecycle {
    closed: Mutex<bool>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
}

impl Lifecycle {
    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn wait(&self) -> u32 {
        match self.child.lock().wait() {
            Ok(status) => status.exit_code(),
            Err(e) => {
                log::warn!("failed to reap shell: {}", e);
                1
            }
        }
    }
}

struct Session {
    generation: u64,
    cwd: PathBuf,
    pid: Option<u32>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    lifecycle: Arc<Lifecycle>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.lifecycle.is_closed()
    }

    /// Hang up the shell's process group, then kill whatever is left.
    fn signal(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGHUP);
                    libc::kill(-(pid as i32), libc::SIGTERM);
                }
                thread::sleep(std::time::Duration::from_millis(100));
                unsafe {
                    libc::kill(-(pid as i32), libc::SIGKILL);
                }
                return;
            }
        }

        if let Err(e) = self.killer.kill() {
            log::debug!("kill failed (process already gone?): {}", e);
        }
    }
}

type SessionMap = Arc<Mutex<HashMap<SessionId, Session>>>;

pub struct SessionManager {
    sessions: SessionMap,
    sink: Arc<dyn EventSink>,
    config: SessionConfig,
    next_generation: AtomicU64,
    /// Serializes spawns. The session map itself is only held briefly, so
    /// input to other tabs keeps flowing while a shell is being replaced.
    spawning: Mutex<()>,
}

impl SessionManager {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_config(sink, SessionConfig::default())
    }

    pub fn with_config(sink: Arc<dyn EventSink>, config: SessionConfig) -> Self {
        SessionManager {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            sink,
            config,
            next_generation: AtomicU64::new(1),
            spawning: Mutex::new(()),
        }
    }

    /// Start a shell in `cwd` for `id`. An existing session under the same id
    /// is terminated first, and its exit event is emitted before any output
    /// of the new shell.
    pub fn spawn(&self, id: SessionId, cwd: &Path) -> Result<()> {
        let _spawning = self.spawning.lock();
        self.replace(id, cwd)
    }

    fn replace(&self, id: SessionId, cwd: &Path) -> Result<()> {
        let incumbent = self.sessions.lock().remove(&id);
        if let Some(old) = incumbent {
            log::info!("replacing terminal session {}", id);
            self.terminate(id, old);
        }

        // Held across `open` so a shell that dies at once is cleared only
        // after it has been inserted.
        let mut sessions = self.sessions.lock();
        let session = self.open(id, cwd)?;
        log::info!(
            "terminal session {} started: {} in {} (pid {:?})",
            id,
            self.config.shell,
            cwd.display(),
            session.pid
        );
        sessions.insert(id, session);
        Ok(())
    }

    fn open(&self, id: SessionId, cwd: &Path) -> Result<Session> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Spawn(format!("failed to open pty: {}", e)))?;

        let mut cmd = CommandBuilder::new(&self.config.shell);
        cmd.args(&self.config.args);
        cmd.cwd(cwd);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(e.to_string()))?;
        // The child has its own handle; ours would keep the reader from seeing EOF.
        drop(pair.slave);

        let io = pair
            .master
            .try_clone_reader()
            .and_then(|reader| Ok((reader, pair.master.take_writer()?)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                abort(&mut child);
                return Err(Error::Spawn(format!("failed to attach to pty: {}", e)));
            }
        };

        let pid = child.process_id();
        let killer = child.clone_killer();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let lifecycle = Arc::new(Lifecycle {
            closed: Mutex::new(false),
            child: Mutex::new(child),
        });

        let pump = OutputPump {
            id,
            generation,
            lifecycle: lifecycle.clone(),
            sessions: self.sessions.clone(),
            sink: self.sink.clone(),
        };
        let started = thread::Builder::new()
            .name(format!("pty-reader-{}", id))
            .spawn(move || pump.run(reader));
        if let Err(e) = started {
            abort(&mut lifecycle.child.lock());
            return Err(Error::Spawn(format!("failed to start output reader: {}", e)));
        }

        Ok(Session {
            generation,
            cwd: cwd.to_path_buf(),
            pid,
            master: pair.master,
            writer,
            killer,
            lifecycle,
        })
    }

    /// Forward raw input. Absent or exited sessions swallow it.
    pub fn write(&self, id: SessionId, data: &[u8]) -> Result<()> {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&id) {
            Some(session) if session.is_live() => write_to(session, data),
            _ => Ok(()),
        }
    }

    pub fn resize(&self, id: SessionId, cols: u16, rows: u16) -> Result<()> {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(&id).filter(|s| s.is_live()) else {
            return Ok(());
        };
        session
            .master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(format!("resize failed: {}", e)))
    }

    /// Submit `command` as a line, starting a shell first if `id` has none.
    /// With `cwd`, the line changes into it before running the command.
    pub fn run_command(&self, id: SessionId, command: &str, cwd: Option<&Path>) -> Result<()> {
        let cwd = cwd.filter(|dir| !dir.as_os_str().is_empty());
        let _spawning = self.spawning.lock();

        if !self.is_alive(id) {
            let start_dir = cwd.map(Path::to_path_buf).unwrap_or_else(fallback_dir);
            self.replace(id, &start_dir)?;
        }
        self.write(id, command_line(command, cwd).as_bytes())
    }

    pub fn interrupt(&self, id: SessionId) -> Result<()> {
        self.write(id, INTERRUPT)
    }

    /// Type a directory change into the shell. The recorded session cwd is
    /// left alone; the UI tracks where its terminals are.
    pub fn change_directory(&self, id: SessionId, dir: &Path) -> Result<()> {
        let line = format!("{}\r", cd_instruction(dir));
        self.write(id, line.as_bytes())
    }

    /// Force-terminate. Killing an absent session does nothing.
    pub fn kill(&self, id: SessionId) {
        let session = self.sessions.lock().remove(&id);
        if let Some(session) = session {
            self.terminate(id, session);
        }
    }

    /// Close all sessions - used during shutdown
    pub fn kill_all(&self) {
        let drained: Vec<(SessionId, Session)> = self.sessions.lock().drain().collect();
        for (id, session) in drained {
            self.terminate(id, session);
        }
    }

    pub fn is_alive(&self, id: SessionId) -> bool {
        self.sessions.lock().get(&id).is_some_and(Session::is_live)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .filter(|(_, s)| s.is_live())
            .map(|(id, s)| SessionInfo {
                id: *id,
                cwd: s.cwd.clone(),
                pid: s.pid,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    fn terminate(&self, id: SessionId, mut session: Session) {
        // Reaping only happens under this lock, so the pid cannot be reused
        // while we signal it.
        let lifecycle = session.lifecycle.clone();
        let mut closed = lifecycle.closed.lock();
        if *closed {
            // Exited on its own and the reader thread reported it.
            return;
        }
        session.signal();

        *closed = true;
        let code = lifecycle.wait();
        log::info!("terminal session {} killed (exit code {})", id, code);
        self.sink.emit(HostEvent::TerminalExited { session: id, code });
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.kill_all();
    }
}

fn write_to(session: &mut Session, data: &[u8]) -> Result<()> {
    session
        .writer
        .write_all(data)
        .and_then(|_| session.writer.flush())
        .map_err(|e| Error::Pty(format!("write failed: {}", e)))
}

fn abort(child: &mut Box<dyn Child + Send + Sync>) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Reader side of one session: streams output until the pty closes.
struct OutputPump {
    id: SessionId,
    generation: u64,
    lifecycle: Arc<Lifecycle>,
    sessions: SessionMap,
    sink: Arc<dyn EventSink>,
}

impl OutputPump {
    fn run(self, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if !self.forward(&buf[..n]) {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                // EIO once the shell is gone
                Err(_) => break,
            }
        }
        self.finish();
    }

    fn forward(&self, chunk: &[u8]) -> bool {
        let closed = self.lifecycle.closed.lock();
        if *closed {
            return false;
        }
        self.sink.emit(HostEvent::TerminalOutput {
            session: self.id,
            data: chunk.to_vec(),
        });
        true
    }

    fn finish(&self) {
        {
            let mut closed = self.lifecycle.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
            let code = self.lifecycle.wait();
            log::info!("terminal session {} exited with code {}", self.id, code);
            self.sink.emit(HostEvent::TerminalExited {
                session: self.id,
                code,
            });
        }

        let mut sessions = self.sessions.lock();
        if sessions
            .get(&self.id)
            .is_some_and(|s| s.generation == self.generation)
        {
            sessions.remove(&self.id);
        }
    }
}

/// The line submitted for a command, optionally changing directory first.
pub fn command_line(command: &str, cwd: Option<&Path>) -> String {
    match cwd.filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => format!("{}{}{}\r", cd_instruction(dir), COMMAND_SEPARATOR, command),
        None => format!("{}\r", command),
    }
}

#[cfg(not(windows))]
fn cd_instruction(dir: &Path) -> String {
    let mut quoted = String::from("cd \"");
    for c in dir.to_string_lossy().chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(windows)]
fn cd_instruction(dir: &Path) -> String {
    format!("cd '{}'", dir.to_string_lossy().replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChannelSink;
    use crossbeam_channel::Receiver;
    use std::time::{Duration, Instant};

    #[cfg(not(windows))]
    #[test]
    fn command_line_prefixes_directory_change() {
        assert_eq!(
            command_line("ls", Some(Path::new("/tmp"))),
            "cd \"/tmp\" && ls\r"
        );
        assert_eq!(command_line("ls", None), "ls\r");
        assert_eq!(command_line("ls", Some(Path::new(""))), "ls\r");
    }

    #[cfg(not(windows))]
    #[test]
    fn cd_instruction_escapes_shell_metacharacters() {
        assert_eq!(
            cd_instruction(Path::new("/w/my \"proj\"/$HOME`x`")),
            "cd \"/w/my \\\"proj\\\"/\\$HOME\\`x\\`\""
        );
    }

    #[test]
    fn absent_session_controls_are_no_ops() {
        let (sink, rx) = ChannelSink::bounded(16);
        let manager = SessionManager::new(Arc::new(sink));

        assert!(!manager.is_alive(1));
        manager.write(1, b"echo hi\r").unwrap();
        manager.resize(1, 80, 24).unwrap();
        manager.interrupt(1).unwrap();
        manager.change_directory(1, Path::new("/tmp")).unwrap();
        manager.kill(1);
        assert!(manager.sessions().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn spawn_failure_leaves_slot_absent() {
        let (sink, rx) = ChannelSink::bounded(16);
        let config = SessionConfig {
            shell: "/definitely/not/a/shell".to_string(),
            ..SessionConfig::default()
        };
        let manager = SessionManager::with_config(Arc::new(sink), config);

        let err = manager.spawn(1, &fallback_dir()).unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
        assert!(!manager.is_alive(1));
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    mod posix {
        use super::*;
        use tempfile::TempDir;

        const TIMEOUT: Duration = Duration::from_secs(10);

        fn manager() -> (SessionManager, Receiver<HostEvent>) {
            let (sink, rx) = ChannelSink::bounded(4096);
            let config = SessionConfig {
                shell: "/bin/sh".to_string(),
                ..SessionConfig::default()
            };
            (SessionManager::with_config(Arc::new(sink), config), rx)
        }

        /// Collect output of `id` until it contains `needle`.
        fn wait_for_output(rx: &Receiver<HostEvent>, id: SessionId, needle: &str) -> String {
            let deadline = Instant::now() + TIMEOUT;
            let mut seen = Vec::new();
            while Instant::now() < deadline {
                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(HostEvent::TerminalOutput { session, data }) if session == id => {
                        seen.extend_from_slice(&data);
                        let text = String::from_utf8_lossy(&seen).into_owned();
                        if text.contains(needle) {
                            return text;
                        }
                    }
                    Ok(HostEvent::TerminalExited { session, code }) if session == id => {
                        panic!("session {id} exited ({code}) before printing {needle:?}")
                    }
                    _ => {}
                }
            }
            panic!(
                "timed out waiting for {needle:?}; saw {:?}",
                String::from_utf8_lossy(&seen)
            );
        }

        fn wait_for_exit(rx: &Receiver<HostEvent>, id: SessionId) -> u32 {
            let deadline = Instant::now() + TIMEOUT;
            while Instant::now() < deadline {
                if let Ok(HostEvent::TerminalExited { session, code }) =
                    rx.recv_timeout(Duration::from_millis(200))
                {
                    if session == id {
                        return code;
                    }
                }
            }
            panic!("session {id} never exited");
        }

        fn process_exists(pid: u32) -> bool {
            unsafe { libc::kill(pid as i32, 0) == 0 }
        }

        #[test]
        fn output_is_forwarded_in_order() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();
            assert!(manager.is_alive(1));

            manager
                .write(1, b"for i in 1 2 3 4 5; do echo line$i; done\r")
                .unwrap();
            let text = wait_for_output(&rx, 1, "line5\r\n");
            let positions: Vec<usize> = (1..=5)
                .map(|i| text.rfind(&format!("line{i}\r\n")).unwrap())
                .collect();
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn shell_exit_emits_one_event_and_clears_slot() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();

            manager.write(1, b"exit 3\r").unwrap();
            assert_eq!(wait_for_exit(&rx, 1), 3);
            assert!(!manager.is_alive(1));

            manager.write(1, b"echo too late\r").unwrap();
            manager.resize(1, 100, 40).unwrap();
            thread::sleep(Duration::from_millis(300));
            assert!(rx.try_iter().all(|event| match event {
                HostEvent::TerminalOutput { session, .. }
                | HostEvent::TerminalExited { session, .. } => session != 1,
                _ => true,
            }));
            assert!(manager.sessions().is_empty());
        }

        #[test]
        fn respawn_terminates_the_incumbent_first() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();
            let old_pid = manager.sessions()[0].pid.unwrap();

            manager.spawn(1, tmp.path()).unwrap();
            let sessions = manager.sessions();
            assert_eq!(sessions.len(), 1);
            assert_ne!(sessions[0].pid, Some(old_pid));
            assert!(!process_exists(old_pid), "old shell still running");

            // The old shell's exit is reported exactly once.
            let exits = rx
                .try_iter()
                .filter(|e| matches!(e, HostEvent::TerminalExited { session: 1, .. }))
                .count();
            assert_eq!(exits, 1);
            assert!(manager.is_alive(1));
        }

        #[test]
        fn replacing_a_shell_does_not_block_other_sessions() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();
            manager.spawn(2, tmp.path()).unwrap();

            thread::scope(|scope| {
                let respawn = scope.spawn(|| manager.spawn(1, tmp.path()));
                // Termination waits out its grace period in here.
                thread::sleep(Duration::from_millis(30));
                let started = Instant::now();
                manager.write(2, b"echo still$((2+3))\r").unwrap();
                assert!(
                    started.elapsed() < Duration::from_millis(60),
                    "input to session 2 waited {:?}",
                    started.elapsed()
                );
                respawn.join().unwrap().unwrap();
            });
            wait_for_output(&rx, 2, "still5");
            assert!(manager.is_alive(1));
        }

        #[test]
        fn killing_an_exited_shell_reports_nothing_more() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(4, tmp.path()).unwrap();

            manager.write(4, b"exit 5\r").unwrap();
            assert_eq!(wait_for_exit(&rx, 4), 5);
            manager.kill(4);
            manager.kill_all();

            thread::sleep(Duration::from_millis(200));
            assert!(rx
                .try_iter()
                .all(|e| !matches!(e, HostEvent::TerminalExited { session: 4, .. })));
        }

        #[test]
        fn kill_is_immediate_and_idempotent() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(7, tmp.path()).unwrap();
            let pid = manager.sessions()[0].pid.unwrap();

            manager.kill(7);
            manager.kill(7);
            assert!(!manager.is_alive(7));
            assert!(!process_exists(pid));
            let exits = rx
                .try_iter()
                .filter(|e| matches!(e, HostEvent::TerminalExited { session: 7, .. }))
                .count();
            assert_eq!(exits, 1);
        }

        #[test]
        fn run_command_spawns_and_changes_directory() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            assert!(!manager.is_alive(2));

            manager
                .run_command(2, "echo $((6*7))done", Some(tmp.path()))
                .unwrap();
            assert!(manager.is_alive(2));
            wait_for_output(&rx, 2, "42done");

            manager.run_command(2, "pwd | tr / :", None).unwrap();
            let expected = tmp.path().to_string_lossy().replace('/', ":");
            wait_for_output(&rx, 2, &expected);
        }

        #[test]
        fn interrupt_stops_the_foreground_command() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();

            manager.write(1, b"sleep 30\r").unwrap();
            thread::sleep(Duration::from_millis(300));
            manager.interrupt(1).unwrap();
            manager.write(1, b"echo after$((1+1))\r").unwrap();
            wait_for_output(&rx, 1, "after2");
            assert!(manager.is_alive(1));
        }

        #[test]
        fn sessions_are_independent() {
            let (manager, rx) = manager();
            let tmp = TempDir::new().unwrap();
            manager.spawn(1, tmp.path()).unwrap();
            manager.spawn(2, tmp.path()).unwrap();

            manager.kill(1);
            assert!(!manager.is_alive(1));
            assert!(manager.is_alive(2));

            manager.resize(2, 90, 20).unwrap();
            manager.write(2, b"stty size\r").unwrap();
            wait_for_output(&rx, 2, "20 90");
        }

        #[test]
        fn kill_all_terminates_everything() {
            let (manager, _rx) = manager();
            let tmp = TempDir::new().unwrap();
            for id in 1..=3 {
                manager.spawn(id, tmp.path()).unwrap();
            }
            let pids: Vec<u32> = manager.sessions().iter().filter_map(|s| s.pid).collect();
            assert_eq!(pids.len(), 3);

            manager.kill_all();
            assert!(manager.sessions().is_empty());
            assert!(pids.iter().all(|pid| !process_exists(*pid)));
        }
    }
}
