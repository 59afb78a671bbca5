//! Shared test helpers for server/client integration tests.
//!
//! Provides a server running on a background thread, a scripted handler
//! with counters, and client options tuned for tests so individual modules
//! can focus on behaviour rather than boilerplate.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sockline::client::{send_command, wait_for_state, ConnectOptions};
use sockline::demo::DemoApp;
use sockline::transport::connect::connect_once;
use sockline::{
    ActiveState, CommandHandler, IpcError, Outcome, ReplyChannel, Result, ServerOptions,
};

/// How long helpers wait for a server to come up or go away.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket path inside a per-test temporary directory.
pub fn socket_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("ipc.sock")
}

/// Client options for tests: wait for busy servers, generous deadline.
pub fn client_options() -> ConnectOptions {
    ConnectOptions {
        wait_if_busy: true,
        timeout: Duration::from_secs(10),
        ..ConnectOptions::default()
    }
}

/// Connect to `path` without sending anything until the kernel reports the
/// accept queue as full. The returned streams keep the queue occupied.
pub fn fill_accept_queue(path: &Path) -> Vec<UnixStream> {
    let mut queued = Vec::new();
    loop {
        match connect_once(path, false) {
            Ok(stream) => queued.push(stream),
            Err(IpcError::Busy(_)) => return queued,
            Err(err) => panic!("unexpected connect failure: {err:?}"),
        }
        assert!(queued.len() < 64, "accept queue never filled");
    }
}

/// A server running `sockline::run` on its own thread.
pub struct TestServer {
    pub path: PathBuf,
    thread: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    /// Start a server at `path` and wait until it accepts connections.
    pub fn start<H: CommandHandler>(path: &Path, options: ServerOptions, handler: Arc<H>) -> Self {
        let server_path = path.to_path_buf();
        let thread = thread::spawn(move || sockline::run(&server_path, &options, handler));

        let state = wait_for_state(path, STARTUP_TIMEOUT, ActiveState::is_listening);
        assert_eq!(state, ActiveState::Listening, "server did not come up");

        Self {
            path: path.to_path_buf(),
            thread: Some(thread),
        }
    }

    /// Start the demo application with `threads` workers.
    pub fn demo(path: &Path, threads: usize) -> Self {
        Self::start(path, ServerOptions::with_threads(threads), DemoApp::new())
    }

    /// Send one command with [`client_options`].
    pub fn send(&self, command: &str) -> Result<Vec<u8>> {
        send_command(&self.path, &client_options(), command)
    }

    /// Send one command and decode the reply as UTF-8.
    pub fn send_text(&self, command: &str) -> String {
        let reply = self.send(command).expect("command must succeed");
        String::from_utf8(reply).expect("reply must be UTF-8")
    }

    /// Send `quit` and wait for `run` to return.
    pub fn stop(mut self) -> Result<()> {
        let reply = self.send("quit")?;
        assert!(reply.is_empty(), "quit carries no reply payload");
        self.join()
    }

    /// Wait for `run` to return without sending anything.
    pub fn join(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread.join().expect("server thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = send_command(&self.path, &client_options(), "quit");
            let _ = self.join();
        }
    }
}

/// Scripted handler with counters for observing server behaviour.
///
/// Commands:
/// - `ping` → `pong`
/// - `fail` → application error before any output
/// - `fail-late` → some output, then an application error
/// - `panic` → handler panic
/// - `hold` → sleep while counted as active, then `held`
/// - `trickle` → 20 rows with a pause after each
/// - `whoami` → address of the handler instance
/// - `gate` → block until [`TestApp::open_gate`], then `opened`
/// - `quit` → quit
#[derive(Debug, Default)]
pub struct TestApp {
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    gate: tokio::sync::Notify,
}

/// Rows emitted by `trickle`.
pub const TRICKLE_ROWS: usize = 20;

/// Time `hold` keeps a worker busy.
pub const HOLD_TIME: Duration = Duration::from_millis(50);

impl TestApp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Let one pending or future `gate` command finish.
    pub fn open_gate(&self) {
        self.gate.notify_one();
    }
}

impl CommandHandler for TestApp {
    async fn handle(&self, command: &str, reply: &mut ReplyChannel) -> Result<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match command {
            "quit" => return Ok(Outcome::Quit),
            "ping" => reply.emit_str("pong").await?,
            "fail" => return Err(IpcError::Application("scripted failure".into())),
            "fail-late" => {
                reply.emit_str("partial output").await?;
                return Err(IpcError::Application("scripted late failure".into()));
            }
            "panic" => panic!("scripted panic"),
            "hold" => {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(HOLD_TIME).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                reply.emit_str("held").await?;
            }
            "trickle" => {
                for n in 0..TRICKLE_ROWS {
                    reply.emit_str(&format!("row {n}\n")).await?;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
            "gate" => {
                self.gate.notified().await;
                reply.emit_str("opened").await?;
            }
            "whoami" => {
                let me = std::ptr::from_ref(self) as usize;
                reply.emit_str(&me.to_string()).await?;
            }
            other => {
                reply.emit_str(&format!("unknown: {other}")).await?;
            }
        }

        Ok(Outcome::Done)
    }
}
