//! UCI engine process (async I/O)
//!
//! One `EngineProcess` owns one engine conversation. A background task reads
//! stdout line by line and feeds the single pending waiter, if any. A second
//! request while one is outstanding fails with `ConcurrentRequest` instead of
//! queuing, since UCI replies carry no correlation id.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::protocol::{classify_line, EngineLine, Handshake};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type LinePredicate = Box<dyn Fn(&str) -> bool + Send>;

/// Options applied during the handshake.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub threads: u32,
    pub hash_mb: u32,
    /// Per handshake step
    pub handshake_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 64,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Engine name and version as reported by `id name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: String,
    pub version: String,
}

impl EngineIdentity {
    /// "Stockfish 16.1" -> ("Stockfish", "16.1"). The version starts at the
    /// first token beginning with a digit or "dev".
    pub fn from_id_name(id_name: &str) -> Self {
        let tokens: Vec<&str> = id_name.split_whitespace().collect();
        let split = tokens
            .iter()
            .skip(1)
            .position(|t| t.starts_with(|c: char| c.is_ascii_digit()) || t.starts_with("dev"))
            .map(|i| i + 1);

        match split {
            Some(i) => Self {
                name: tokens[..i].join(" "),
                version: tokens[i..].join(" "),
            },
            None if !tokens.is_empty() => Self {
                name: tokens.join(" "),
                version: "unknown".to_string(),
            },
            None => Self::default(),
        }
    }
}

impl Default for EngineIdentity {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "unknown".to_string(),
        }
    }
}

struct PendingRequest {
    predicate: LinePredicate,
    lines: Vec<String>,
    reply: oneshot::Sender<Result<Vec<String>, WorkerError>>,
}

/// The one conversation an engine can hold at a time.
#[derive(Default)]
struct Conversation {
    pending: Option<PendingRequest>,
    busy: bool,
    exited: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the conversation slot however the request ends, including when the
/// caller drops the future mid-wait.
struct BusyGuard<'a> {
    conversation: &'a Mutex<Conversation>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(self.conversation);
        state.pending = None;
        state.busy = false;
    }
}

pub struct EngineProcess {
    conversation: Arc<Mutex<Conversation>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Set after a timeout or exit; the instance must not be reused.
    poisoned: AtomicBool,
    stopped: AtomicBool,
    identity: EngineIdentity,
    options: EngineOptions,
}

impl EngineProcess {
    /// Spawn the engine binary and complete the UCI handshake.
    pub async fn start(path: &str, options: EngineOptions) -> Result<Self, WorkerError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::EngineUnavailable(format!("failed to spawn {path}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::EngineUnavailable("engine stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::EngineUnavailable("engine stdout not captured".into()))?;

        let engine = Self::attach(stdout, stdin, Some(child), options);
        engine.finish_startup().await
    }

    /// Run the handshake over already-connected streams (in-process engines).
    pub async fn connect<R, W>(reader: R, writer: W, options: EngineOptions) -> Result<Self, WorkerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::attach(reader, writer, None, options).finish_startup().await
    }

    fn attach<R, W>(reader: R, writer: W, child: Option<Child>, options: EngineOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conversation = Arc::new(Mutex::new(Conversation::default()));
        let handle = tokio::spawn(pump_lines(reader, Arc::clone(&conversation)));

        Self {
            conversation,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            child: Mutex::new(child),
            reader: Mutex::new(Some(handle)),
            poisoned: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            identity: EngineIdentity::default(),
            options,
        }
    }

    async fn finish_startup(mut self) -> Result<Self, WorkerError> {
        match self.handshake().await {
            Ok(()) => {
                info!(
                    engine = %self.identity.name,
                    version = %self.identity.version,
                    "Engine ready"
                );
                Ok(self)
            }
            Err(e) => {
                self.stop().await;
                Err(WorkerError::EngineUnavailable(format!("handshake failed: {e}")))
            }
        }
    }

    async fn handshake(&mut self) -> Result<(), WorkerError> {
        let step_timeout = self.options.handshake_timeout;

        let lines = self
            .request(&["uci"], |line| line.trim() == "uciok", step_timeout)
            .await?;
        let id_name = lines.iter().find_map(|line| {
            classify_line(line).into_iter().find_map(|token| match token {
                EngineLine::Handshake(Handshake::IdName(name)) => Some(name),
                _ => None,
            })
        });
        if let Some(name) = id_name {
            self.identity = EngineIdentity::from_id_name(&name);
        }

        self.send(&format!("setoption name Threads value {}", self.options.threads))
            .await?;
        self.send(&format!("setoption name Hash value {}", self.options.hash_mb))
            .await?;
        self.request(&["isready"], |line| line.trim() == "readyok", step_timeout)
            .await?;

        self.send("ucinewgame").await?;
        self.request(&["isready"], |line| line.trim() == "readyok", step_timeout)
            .await?;

        Ok(())
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    /// False once the instance has been stopped or invalidated.
    pub fn is_usable(&self) -> bool {
        !self.poisoned.load(Ordering::SeqCst)
            && !self.stopped.load(Ordering::SeqCst)
            && !lock(&self.conversation).exited
    }

    /// Register the waiter, then send `commands`, then collect every line up to
    /// and including the first one matching `predicate`.
    pub async fn request<P>(
        &self,
        commands: &[&str],
        predicate: P,
        timeout: Duration,
    ) -> Result<Vec<String>, WorkerError>
    where
        P: Fn(&str) -> bool + Send + 'static,
    {
        if self.poisoned.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return Err(WorkerError::EngineNotRunning);
        }

        let reply = {
            let mut state = lock(&self.conversation);
            if state.exited {
                return Err(WorkerError::EngineProcessExited);
            }
            if state.busy {
                return Err(WorkerError::ConcurrentRequest);
            }
            let (tx, rx) = oneshot::channel();
            state.pending = Some(PendingRequest {
                predicate: Box::new(predicate),
                lines: Vec::new(),
                reply: tx,
            });
            state.busy = true;
            rx
        };
        let _guard = BusyGuard {
            conversation: &self.conversation,
        };

        for command in commands {
            if let Err(e) = self.send(command).await {
                self.poison();
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(lines))) => Ok(lines),
            Ok(Ok(Err(e))) => {
                self.poison();
                Err(e)
            }
            Ok(Err(_)) => {
                self.poison();
                Err(WorkerError::EngineProcessExited)
            }
            Err(_) => {
                self.poison();
                warn!(timeout_ms = timeout.as_millis() as u64, "Engine request timed out");
                Err(WorkerError::EngineTimeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Wait for a line matching `predicate` without sending anything.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Duration) -> Result<Vec<String>, WorkerError>
    where
        P: Fn(&str) -> bool + Send + 'static,
    {
        self.request(&[], predicate, timeout).await
    }

    /// Write one command line to the engine.
    pub async fn send(&self, command: &str) -> Result<(), WorkerError> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(WorkerError::EngineNotRunning)?;

        debug!(cmd = command, "SF <");
        stream
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(write_error)?;
        stream.flush().await.map_err(write_error)?;
        Ok(())
    }

    /// Send `quit`, kill the process and release the reader. Safe to call
    /// more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut stream) = writer {
            debug!(cmd = "quit", "SF <");
            let _ = stream.write_all(b"quit\n").await;
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }

        let child = lock(&self.child).take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }

        let mut state = lock(&self.conversation);
        state.exited = true;
        if let Some(pending) = state.pending.take() {
            let _ = pending.reply.send(Err(WorkerError::EngineNotRunning));
        }
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        if let Ok(Some(child)) = self.child.get_mut().map(Option::as_mut) {
            let _ = child.start_kill();
        }
        if let Ok(Some(handle)) = self.reader.get_mut().map(Option::take) {
            handle.abort();
        }
    }
}

fn write_error(e: std::io::Error) -> WorkerError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            WorkerError::EngineProcessExited
        }
        _ => WorkerError::Io(e),
    }
}

async fn pump_lines<R>(reader: R, conversation: Arc<Mutex<Conversation>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(line = line.trim(), "SF >");
                let mut state = lock(&conversation);
                let finished = match state.pending.as_mut() {
                    Some(pending) => {
                        let done = (pending.predicate)(&line);
                        pending.lines.push(line);
                        done
                    }
                    None => false,
                };
                if finished {
                    if let Some(pending) = state.pending.take() {
                        let _ = pending.reply.send(Ok(pending.lines));
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from engine");
                break;
            }
        }
    }

    let mut state = lock(&conversation);
    state.exited = true;
    if let Some(pending) = state.pending.take() {
        let _ = pending.reply.send(Err(WorkerError::EngineProcessExited));
    }
}

/// Produces a fresh, handshaken engine for each analysis unit.
pub trait EngineLauncher: Send + Sync {
    fn launch(&self) -> impl Future<Output = Result<EngineProcess, WorkerError>> + Send;
}

/// Launches a local Stockfish binary.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    pub path: String,
    pub options: EngineOptions,
}

impl StockfishLauncher {
    pub fn new(path: impl Into<String>, options: EngineOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }
}

impl EngineLauncher for StockfishLauncher {
    async fn launch(&self) -> Result<EngineProcess, WorkerError> {
        EngineProcess::start(&self.path, self.options.clone()).await
    }
}

/// Find the engine binary: the configured path, then `./stockfish`, then
/// `stockfish` on PATH.
pub fn resolve_engine_path(configured: &str) -> Result<String, WorkerError> {
    let candidates = [configured, "./stockfish", "stockfish"];

    for candidate in candidates.iter().filter(|c| !c.is_empty()) {
        if let Some(found) = locate(candidate) {
            return Ok(found.to_string_lossy().into_owned());
        }
    }

    Err(WorkerError::EngineUnavailable(format!(
        "no engine binary found (tried {})",
        candidates.join(", ")
    )))
}

fn locate(candidate: &str) -> Option<PathBuf> {
    let path = Path::new(candidate);
    if candidate.contains(std::path::MAIN_SEPARATOR) || candidate.contains('/') {
        return path.is_file().then(|| path.to_path_buf());
    }

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(candidate))
            .find(|full| full.is_file())
    })
}
