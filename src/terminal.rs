// Terminal/PTY System
//
// This module implements the three-tier terminal system:
// - Terminal (base): Non-interactive PTY for running commands (deploy, logs, etc.)
// - InteractiveTerminal: Adds write() for user input (container exec)
// - MainTerminal: System shell (bash/pwsh) with limited commands
//
// Key features:
// - PTY spawning with configurable rows/cols
// - Output buffering via a byte-bounded scrollback (see utils/scrollback.rs)
// - Socket room-based broadcasting (terminalWrite, terminalExit events)
// - Connection-id-keyed writer tracking, independent of room membership
//   counts (socketioxide has no API to read those back)
// - Cancellable pipe terminals self-destruct once their last writer detaches
// - Static registry: RwLock<HashMap<String, Arc<Terminal>>>
// - exec() — one-shot command execution returning exit code

use crate::utils::constants::{PROGRESS_TERMINAL_ROWS, TERMINAL_COLS, TERMINAL_ROWS};
use crate::utils::scrollback::ScrollbackBuffer;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use portable_pty::{Child, ChildKiller, CommandBuilder, PtyPair, PtySize};
use socketioxide::extract::SocketRef;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Terminal type determines behavior and capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalType {
    /// Base terminal for running non-interactive commands
    Base,
    /// Interactive terminal that accepts user input
    Interactive,
    /// Main terminal (system shell) for console access
    Main,
}

/// Whether a terminal is a driveable pseudo-terminal or a one-way output
/// pipe. Only `Pipe` terminals participate in writer-count auto-teardown;
/// a `Pty` (interactive shell, container exec) stays up until explicitly
/// closed, since a brief reconnect shouldn't kill the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Pty,
    Pipe,
}

impl TerminalType {
    fn kind(self) -> Kind {
        match self {
            TerminalType::Base => Kind::Pipe,
            TerminalType::Interactive | TerminalType::Main => Kind::Pty,
        }
    }
}

/// Represents a pseudo-terminal with PTY support
pub struct Terminal {
    /// Terminal type (Base, Interactive, Main)
    terminal_type: TerminalType,
    /// Pty vs Pipe, derived from `terminal_type`
    kind: Kind,
    /// Unique terminal name
    name: String,
    /// Socket.io handle for broadcasting events
    io: socketioxide::SocketIo,
    /// Internal mutable state
    inner: Arc<Mutex<TerminalInner>>,
}

/// Internal mutable state of a terminal
struct TerminalInner {
    /// PTY pair (master/slave)
    pty_pair: Option<PtyPair>,
    /// Output scrollback, bounded by byte count rather than chunk count
    buffer: ScrollbackBuffer,
    /// Number of rows
    rows: u16,
    /// Number of columns
    cols: u16,
    /// Marks this terminal as cancellable: eligible for writer-count
    /// auto-teardown once it also has a live kill handle. Repurposes the
    /// old keep-alive flag, since both its call sites (combined compose
    /// logs, per-service logs) are exactly the "tear down when unwatched"
    /// terminals this now governs.
    enable_keep_alive: bool,
    /// Kill handle for the spawned child, captured at start() before the
    /// child is moved into its blocking wait task.
    cancel: Option<Box<dyn ChildKiller + Send + Sync>>,
    /// Connection ids (socket.id) currently joined as writers/readers.
    writers: HashSet<String>,
    /// Exit callback
    on_exit_callback: Option<Box<dyn FnOnce(i32) + Send>>,
    /// Reader task handle
    reader_task: Option<JoinHandle<()>>,
    /// Cleanup tasks handle (kick clients + keep alive)
    cleanup_task: Option<JoinHandle<()>>,
}

/// Static registry of all active terminals
static TERMINAL_REGISTRY: Lazy<RwLock<HashMap<String, Arc<Terminal>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl Terminal {
    /// Create a new terminal
    ///
    /// # Arguments
    /// * `io` - Socket.io handle for broadcasting
    /// * `name` - Unique terminal name
    /// * `terminal_type` - Type of terminal (Base, Interactive, Main)
    /// * `file` - Command/shell to execute
    /// * `args` - Command arguments
    /// * `cwd` - Working directory
    pub fn new(
        io: socketioxide::SocketIo,
        name: String,
        terminal_type: TerminalType,
        _file: String,
        _args: Vec<String>,
        _cwd: String,
    ) -> Arc<Self> {
        let terminal = Arc::new(Self {
            terminal_type,
            kind: terminal_type.kind(),
            name: name.clone(),
            io: io.clone(),
            inner: Arc::new(Mutex::new(TerminalInner {
                pty_pair: None,
                buffer: ScrollbackBuffer::new(),
                rows: TERMINAL_ROWS,
                cols: TERMINAL_COLS,
                enable_keep_alive: false,
                cancel: None,
                writers: HashSet::new(),
                on_exit_callback: None,
                reader_task: None,
                cleanup_task: None,
            })),
        });

        // Register in static registry
        let terminal_clone = terminal.clone();
        tokio::spawn(async move {
            let mut registry = TERMINAL_REGISTRY.write().await;
            registry.insert(name, terminal_clone);
        });

        terminal
    }

    /// Create a new interactive terminal
    pub fn new_interactive(
        io: socketioxide::SocketIo,
        name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Arc<Self> {
        Self::new(io, name, TerminalType::Interactive, file, args, cwd)
    }

    /// Create a new main terminal (system shell)
    pub fn new_main(
        io: socketioxide::SocketIo,
        name: String,
        stacks_dir: String,
    ) -> Result<Arc<Self>> {
        let (shell, args) = Self::detect_shell()?;
        Ok(Self::new(
            io,
            name,
            TerminalType::Main,
            shell,
            args,
            stacks_dir,
        ))
    }

    /// Re-create a terminal under the same name, carrying over any writers
    /// that were attached to the previous instance (e.g. a deploy that gets
    /// re-run while a socket is still watching its terminal name).
    pub async fn recreate(
        io: socketioxide::SocketIo,
        name: String,
        terminal_type: TerminalType,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Arc<Self> {
        let previous_writers = {
            let registry = TERMINAL_REGISTRY.read().await;
            match registry.get(&name) {
                Some(old) => old.inner.lock().await.writers.clone(),
                None => HashSet::new(),
            }
        };

        let terminal = Self::new(io, name, terminal_type, file, args, cwd);
        if !previous_writers.is_empty() {
            let mut inner = terminal.inner.lock().await;
            inner.writers = previous_writers;
        }
        terminal
    }

    /// Detect system shell (bash on Unix, powershell on Windows)
    fn detect_shell() -> Result<(String, Vec<String>)> {
        #[cfg(target_os = "windows")]
        {
            // Check for pwsh.exe first, fall back to powershell.exe
            if which::which("pwsh.exe").is_ok() {
                Ok(("pwsh.exe".to_string(), vec![]))
            } else {
                Ok(("powershell.exe".to_string(), vec![]))
            }
        }

        #[cfg(not(target_os = "windows"))]
        {
            Ok(("bash".to_string(), vec![]))
        }
    }

    /// Get terminal name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get terminal type
    pub fn terminal_type(&self) -> TerminalType {
        self.terminal_type
    }

    /// Get terminal kind (Pty vs Pipe)
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Set number of rows
    pub async fn set_rows(&self, rows: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rows = rows;
        if let Some(ref pty_pair) = inner.pty_pair {
            pty_pair
                .master
                .resize(PtySize {
                    rows,
                    cols: inner.cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        Ok(())
    }

    /// Set number of columns
    pub async fn set_cols(&self, cols: u16) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cols = cols;
        debug!("Terminal {} cols: {}", self.name, cols);
        if let Some(ref pty_pair) = inner.pty_pair {
            pty_pair
                .master
                .resize(PtySize {
                    rows: inner.rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .context("Failed to resize PTY")?;
        }
        Ok(())
    }

    /// Mark this terminal as cancellable: once it also has a live kill
    /// handle (set on start()), it self-destructs when its last writer
    /// detaches instead of lingering until process exit.
    pub async fn enable_keep_alive(&self, enable: bool) {
        let mut inner = self.inner.lock().await;
        inner.enable_keep_alive = enable;
    }

    /// Start the terminal (spawn PTY and begin output monitoring)
    pub async fn start(
        self: &Arc<Self>,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Don't start if already running
        if inner.pty_pair.is_some() {
            return Ok(());
        }

        let rows = inner.rows;
        let cols = inner.cols;

        drop(inner); // Release lock before spawning tasks

        // Spawn PTY
        let pty_system = portable_pty::native_pty_system();
        let pty_pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        // Spawn command in PTY
        let mut cmd = CommandBuilder::new(&file);
        cmd.args(&args);
        cmd.cwd(&cwd);

        let mut child = pty_pair
            .slave
            .spawn_command(cmd)
            .context("Failed to spawn command in PTY")?;

        // Clone a kill handle before the child is moved into the blocking
        // wait task below; this is the only way to cancel it afterwards.
        let killer = child.clone_killer();

        debug!(
            "Terminal {} spawned: {} {:?} in {}",
            self.name, file, args, cwd
        );

        // Store PTY pair
        let mut inner = self.inner.lock().await;
        inner.pty_pair = Some(pty_pair);
        inner.cancel = Some(killer);
        drop(inner);

        // Spawn reader task to monitor PTY output
        let reader_task = self.spawn_reader_task().await;

        // Spawn cleanup task that drops this terminal from the registry
        // once it has been torn down via writer-count auto-teardown or
        // process exit
        let cleanup_task = self.spawn_cleanup_task();

        // Spawn exit monitor task
        let terminal_clone = self.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            match child.wait() {
                Ok(exit_status) => {
                    let exit_code = exit_status.exit_code() as i32;
                    info!("Terminal {} exited with code {}", name, exit_code);
                    //Use tokio handle to spawn async task
                    let terminal_ref = terminal_clone.clone();
                    tokio::runtime::Handle::current().block_on(async move {
                        terminal_ref.handle_exit(exit_code).await;
                    });
                }
                Err(e) => {
                    error!("Terminal {} wait error: {}", name, e);
                    let terminal_ref = terminal_clone.clone();
                    tokio::runtime::Handle::current().block_on(async move {
                        terminal_ref.handle_exit(1).await;
                    });
                }
            }
        });

        // Store task handles
        let mut inner = self.inner.lock().await;
        inner.reader_task = Some(reader_task);
        inner.cleanup_task = Some(cleanup_task);

        Ok(())
    }

    /// Spawn task to read PTY output and broadcast to clients
    async fn spawn_reader_task(self: &Arc<Self>) -> JoinHandle<()> {
        let terminal = Arc::clone(self);
        let name = self.name.clone();

        // Get reader before spawning
        let reader_opt = {
            let inner = terminal.inner.lock().await;
            inner
                .pty_pair
                .as_ref()
                .and_then(|p| p.master.try_clone_reader().ok())
        };

        tokio::task::spawn_blocking(move || {
            let Some(reader) = reader_opt else {
                return;
            };
            let rt = tokio::runtime::Handle::current();

            let mut buf_reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                match buf_reader.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let data = line.clone();
                        line.clear();

                        // Broadcast to clients in async context
                        rt.block_on(async {
                            terminal.broadcast_output(&data).await;
                        });
                    }
                    Err(e) => {
                        debug!("Terminal {} reader error: {}", name, e);
                        break;
                    }
                }
            }

            debug!("Terminal {} reader task exited", name);
        })
    }

    /// Broadcast output to all connected clients
    async fn broadcast_output(&self, data: &str) {
        let data = if self.kind == Kind::Pipe {
            normalize_line_endings(data)
        } else {
            data.to_string()
        };

        // Add to scrollback
        {
            let mut inner = self.inner.lock().await;
            inner.buffer.push(data.as_bytes());
        }

        // Broadcast to all sockets in the terminal's room
        let room_name = self.name.clone();
        let _ = self
            .io
            .to(room_name)
            .emit("terminalWrite", (&self.name, &data));
    }

    /// Spawn cleanup task for periodic bookkeeping. Writer-count teardown
    /// happens inline in `leave`/`remove_writer_from_all`; this task just
    /// exits once the terminal is gone from the registry.
    fn spawn_cleanup_task(&self) -> JoinHandle<()> {
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));

            loop {
                interval.tick().await;

                let registry = TERMINAL_REGISTRY.read().await;
                if !registry.contains_key(&name) {
                    debug!("Terminal {} cleanup task: terminal removed, exiting", name);
                    break;
                }
            }

            debug!("Terminal {} cleanup task exited", name);
        })
    }

    /// Handle terminal exit
    async fn handle_exit(&self, exit_code: i32) {
        debug!("Terminal {} handling exit: {}", self.name, exit_code);

        // Broadcast exit to all clients
        let room_name = self.name.clone();
        let _ = self
            .io
            .to(room_name)
            .emit("terminalExit", (&self.name, exit_code));

        // Call exit callback
        let callback = {
            let mut inner = self.inner.lock().await;
            inner.on_exit_callback.take()
        };

        if let Some(callback) = callback {
            callback(exit_code);
        }

        // Abort cleanup tasks
        {
            let mut inner = self.inner.lock().await;
            inner.cancel = None;
            if let Some(task) = inner.cleanup_task.take() {
                task.abort();
            }
            if let Some(task) = inner.reader_task.take() {
                task.abort();
            }
        }

        // Remove from registry
        let mut registry = TERMINAL_REGISTRY.write().await;
        registry.remove(&self.name);

        debug!("Terminal {} removed from registry", self.name);
    }

    /// Register an exit callback
    pub async fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce(i32) + Send + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.on_exit_callback = Some(Box::new(callback));
    }

    /// Join a socket to this terminal's room and track it as a writer.
    pub async fn join(&self, socket: SocketRef) -> Result<()> {
        let room_name = self.name.clone();
        socket
            .join(room_name)
            .context("Failed to join socket to terminal room")?;
        {
            let mut inner = self.inner.lock().await;
            inner.writers.insert(socket.id.to_string());
        }
        debug!("Socket {} joined terminal {}", socket.id, self.name);
        Ok(())
    }

    /// Leave a socket from this terminal's room. If this was the last
    /// writer on a cancellable pipe terminal, the terminal is torn down.
    pub async fn leave(&self, socket: SocketRef) -> Result<()> {
        let room_name = self.name.clone();
        socket
            .leave(room_name)
            .context("Failed to leave socket from terminal room")?;
        self.remove_writer(&socket.id.to_string()).await;
        debug!("Socket {} left terminal {}", socket.id, self.name);
        Ok(())
    }

    /// Remove a connection id from this terminal's writer set, destroying
    /// the terminal if that was its last writer and it is a cancellable
    /// pipe terminal (kind=Pipe, has a live kill handle, now writerless).
    async fn remove_writer(&self, connection_id: &str) {
        let should_destroy = {
            let mut inner = self.inner.lock().await;
            inner.writers.remove(connection_id);
            self.kind == Kind::Pipe
                && inner.enable_keep_alive
                && inner.cancel.is_some()
                && inner.writers.is_empty()
        };

        if should_destroy {
            self.destroy().await;
        }
    }

    /// Remove a disconnected connection's writer membership from every
    /// registered terminal, tearing down any cancellable pipe terminal that
    /// is left with none.
    pub async fn remove_writer_from_all(connection_id: &str) {
        let terminals: Vec<Arc<Terminal>> = {
            let registry = TERMINAL_REGISTRY.read().await;
            registry.values().cloned().collect()
        };

        for terminal in terminals {
            terminal.remove_writer(connection_id).await;
        }
    }

    /// Kill the underlying process (if any), abort background tasks, and
    /// drop this terminal from the registry.
    async fn destroy(&self) {
        debug!("Terminal {} destroying (no writers remain)", self.name);

        let mut inner = self.inner.lock().await;
        if let Some(mut killer) = inner.cancel.take() {
            let _ = killer.kill();
        }
        if let Some(task) = inner.cleanup_task.take() {
            task.abort();
        }
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }
        drop(inner);

        let mut registry = TERMINAL_REGISTRY.write().await;
        registry.remove(&self.name);
    }

    /// Get terminal output buffer
    pub async fn get_buffer(&self) -> String {
        let inner = self.inner.lock().await;
        inner.buffer.as_string()
    }

    /// Close the terminal. Pipe terminals with a kill handle are killed
    /// outright; interactive shells get a Ctrl+C so the user's session
    /// itself survives.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if self.kind == Kind::Pipe {
            if let Some(mut killer) = inner.cancel.take() {
                let _ = killer.kill();
            }
        } else if let Some(ref pty_pair) = inner.pty_pair {
            let mut writer = pty_pair.master.take_writer()?;
            writer.write_all(b"\x03")?; // Ctrl+C
            writer.flush()?;
        }

        // Abort cleanup tasks
        if let Some(task) = inner.cleanup_task.take() {
            task.abort();
        }
        if let Some(task) = inner.reader_task.take() {
            task.abort();
        }

        Ok(())
    }

    /// Write input to terminal (for interactive terminals only)
    pub async fn write(&self, input: &str) -> Result<()> {
        if !matches!(
            self.terminal_type,
            TerminalType::Interactive | TerminalType::Main
        ) {
            anyhow::bail!("Cannot write to non-interactive terminal");
        }

        let inner = self.inner.lock().await;
        if let Some(ref pty_pair) = inner.pty_pair {
            let mut writer = pty_pair.master.take_writer()?;
            writer.write_all(input.as_bytes())?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Get a terminal from the registry
    pub async fn get_terminal(name: &str) -> Option<Arc<Terminal>> {
        let registry = TERMINAL_REGISTRY.read().await;
        registry.get(name).cloned()
    }

    /// Get or create a terminal
    pub async fn get_or_create_terminal(
        io: socketioxide::SocketIo,
        name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Arc<Terminal> {
        // Check if terminal exists
        {
            let registry = TERMINAL_REGISTRY.read().await;
            if let Some(terminal) = registry.get(&name) {
                return terminal.clone();
            }
        }

        // Create new terminal
        Self::new(io, name, TerminalType::Base, file, args, cwd)
    }

    /// Execute a command and wait for it to complete (one-shot execution)
    ///
    /// # Arguments
    /// * `io` - Socket.io handle
    /// * `socket` - Optional socket to join for output streaming
    /// * `terminal_name` - Unique terminal name
    /// * `file` - Command to execute
    /// * `args` - Command arguments
    /// * `cwd` - Working directory
    ///
    /// # Returns
    /// Exit code of the command
    pub async fn exec(
        io: socketioxide::SocketIo,
        socket: Option<SocketRef>,
        terminal_name: String,
        file: String,
        args: Vec<String>,
        cwd: String,
    ) -> Result<i32> {
        // Check if terminal already exists
        {
            let registry = TERMINAL_REGISTRY.read().await;
            if registry.contains_key(&terminal_name) {
                anyhow::bail!("Another operation is already running, please try again later.");
            }
        }

        // Create terminal
        let terminal = Terminal::new(
            io.clone(),
            terminal_name.clone(),
            TerminalType::Base,
            file.clone(),
            args.clone(),
            cwd.clone(),
        );

        // Set progress terminal size
        terminal.set_rows(PROGRESS_TERMINAL_ROWS).await?;

        // Join socket if provided
        if let Some(socket) = socket {
            terminal.join(socket).await?;
        }

        // Create channel for exit code
        let (tx, rx) = tokio::sync::oneshot::channel();

        // Register exit callback
        terminal
            .on_exit(move |exit_code| {
                let _ = tx.send(exit_code);
            })
            .await;

        // Start terminal
        terminal.start(file, args, cwd).await?;

        // Wait for exit
        let exit_code = rx.await.unwrap_or(1);

        Ok(exit_code)
    }

    /// Get count of active terminals
    pub async fn get_terminal_count() -> usize {
        let registry = TERMINAL_REGISTRY.read().await;
        registry.len()
    }
}

/// Normalize bare `\n` to `\r\n` for pipe-kind terminals (compose/service
/// logs), whose source is a process's raw stdout rather than a PTY line
/// discipline that already does this.
fn normalize_line_endings(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut prev = None;
    for c in data.chars() {
        if c == '\n' && prev != Some('\r') {
            out.push('\r');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_io() -> socketioxide::SocketIo {
        let (_, io) = socketioxide::SocketIo::new_layer();
        io
    }

    #[tokio::test]
    async fn test_terminal_creation() {
        let io = create_test_io();
        let terminal = Terminal::new(
            io,
            "test-terminal".to_string(),
            TerminalType::Base,
            "echo".to_string(),
            vec!["hello".to_string()],
            ".".to_string(),
        );

        assert_eq!(terminal.name(), "test-terminal");
        assert_eq!(terminal.terminal_type(), TerminalType::Base);
        assert_eq!(terminal.kind(), Kind::Pipe);
    }

    #[tokio::test]
    async fn test_interactive_terminal_is_pty_kind() {
        let io = create_test_io();
        let terminal = Terminal::new_interactive(
            io,
            "test-interactive".to_string(),
            "bash".to_string(),
            vec![],
            ".".to_string(),
        );
        assert_eq!(terminal.kind(), Kind::Pty);
    }

    #[tokio::test]
    async fn test_terminal_registry() {
        let io = create_test_io();
        let name = format!("test-registry-{}", uuid::Uuid::new_v4());

        // Create terminal
        let terminal = Terminal::new(
            io.clone(),
            name.clone(),
            TerminalType::Base,
            "echo".to_string(),
            vec![],
            ".".to_string(),
        );

        // Wait for registration
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Verify it's in registry
        let found = Terminal::get_terminal(&name).await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().name(), name);
    }

    #[tokio::test]
    async fn test_detect_shell() {
        let result = Terminal::detect_shell();
        assert!(result.is_ok());

        let (shell, _args) = result.unwrap();

        #[cfg(target_os = "windows")]
        assert!(shell == "pwsh.exe" || shell == "powershell.exe");

        #[cfg(not(target_os = "windows"))]
        assert_eq!(shell, "bash");
    }

    #[tokio::test]
    async fn test_terminal_resize() {
        let io = create_test_io();
        let terminal = Terminal::new(
            io,
            "test-resize".to_string(),
            TerminalType::Base,
            "echo".to_string(),
            vec![],
            ".".to_string(),
        );

        let result = terminal.set_rows(50).await;
        assert!(result.is_ok());

        let result = terminal.set_cols(120).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_join_and_leave_track_writers() {
        let (_, io) = socketioxide::SocketIo::new_layer();
        let name = format!("test-writers-{}", uuid::Uuid::new_v4());
        let terminal = Terminal::new(
            io,
            name,
            TerminalType::Base,
            "echo".to_string(),
            vec![],
            ".".to_string(),
        );

        // No PTY spawned, no cancel handle, so leaving never auto-destroys
        // a terminal that was never marked cancellable.
        let inner = terminal.inner.lock().await;
        assert!(inner.writers.is_empty());
        assert!(!inner.enable_keep_alive);
    }

    #[test]
    fn test_normalize_line_endings_leaves_crlf_alone() {
        assert_eq!(normalize_line_endings("a\r\nb\n"), "a\r\nb\r\n");
        assert_eq!(normalize_line_endings("no newline"), "no newline");
    }
}
