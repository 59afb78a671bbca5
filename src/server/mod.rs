//! Local IPC server.
//!
//! A fixed pool of workers services one command per connection:
//!
//! ```text
//!  client ──connect──▶ backlog ──accept (needs a free permit)──▶ worker task
//!                                                                  │ read command
//!                                                                  │ handler.handle(cmd, reply)
//!                                                                  │ emit … emit
//!  client ◀──────────────── reply packets + flush, then close ─────┘
//! ```
//!
//! The acceptor only calls `accept` while it holds one of `threads` permits,
//! so at most `threads` requests are serviced at once and everybody else
//! waits in the kernel's listen backlog. A handler returning
//! [`Outcome::Quit`] stops the acceptor; accepted connections finish and
//! [`run`] returns once they have.

pub mod handler;
pub mod reply;
pub mod shutdown;
mod worker;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::transport::SocketListener;
use crate::{IpcError, Result};

pub use handler::{CommandHandler, Outcome};
pub use reply::ReplyChannel;
pub use shutdown::{ServerState, ShutdownCoordinator};

/// Default size of the worker pool.
pub const DEFAULT_THREADS: usize = 5;

/// Default cap on the size of a single command.
pub const DEFAULT_MAX_COMMAND_BYTES: usize = 16 * 1024 * 1024;

/// Default number of connections the kernel queues while every worker is
/// busy.
pub const DEFAULT_LISTEN_BACKLOG: u32 = 128;

/// Default time a client gets to deliver its command after being accepted.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Server tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Number of requests serviced concurrently; values below 1 mean 1.
    pub threads: usize,
    /// Largest command accepted, in bytes.
    pub max_command_bytes: usize,
    /// Pending connections the kernel queues before connects fail as busy.
    pub listen_backlog: u32,
    /// How long an accepted connection may take to deliver its command
    /// before it is closed and its worker freed.
    pub command_timeout: Duration,
}

impl ServerOptions {
    /// Options with the given pool size and defaults otherwise.
    #[must_use]
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            ..Self::default()
        }
    }

    /// Effective pool size.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.threads.max(1)
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            max_command_bytes: DEFAULT_MAX_COMMAND_BYTES,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// A bound server that has not started serving yet.
#[derive(Debug)]
pub struct IpcServer {
    listener: SocketListener,
    options: ServerOptions,
    shutdown: ShutdownCoordinator,
}

impl IpcServer {
    /// Bind the server socket. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Transport`] if the socket cannot be bound.
    pub fn bind(path: impl AsRef<Path>, options: ServerOptions) -> Result<Self> {
        let listener = SocketListener::bind(path.as_ref(), options.listen_backlog)?;
        Ok(Self {
            listener,
            options,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    /// Path the server is bound at.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.listener.path()
    }

    /// Handle for observing the run or requesting a drain from outside a
    /// handler (for example on Ctrl-C).
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Serve connections until a quit is requested and every accepted
    /// connection has finished.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Transport`] if the worker pool cannot be
    /// maintained; per-connection failures are logged, never returned.
    pub async fn serve<H: CommandHandler>(self, handler: Arc<H>) -> Result<()> {
        let Self {
            listener,
            options,
            shutdown,
        } = self;

        let span = info_span!("ipc_server", path = %listener.path().display());
        async move {
            let threads = options.worker_count();
            let slots = Arc::new(Semaphore::new(threads));
            let mut next_id: u64 = 0;
            info!(threads, "IPC server listening");

            let outcome = loop {
                let permit = tokio::select! {
                    biased;
                    () = shutdown.quit_requested() => break Ok(()),
                    permit = Arc::clone(&slots).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(err) => break Err(IpcError::Transport(format!("worker pool closed: {err}"))),
                    },
                };

                let stream = tokio::select! {
                    biased;
                    () = shutdown.quit_requested() => break Ok(()),
                    accepted = listener.accept() => match accepted {
                        Ok(stream) => stream,
                        Err(err) => {
                            warn!(%err, "IPC accept failed");
                            drop(permit);
                            tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                            continue;
                        }
                    },
                };

                if shutdown.is_draining() {
                    debug!("closing connection accepted after quit");
                    break Ok(());
                }

                next_id += 1;
                let conn = worker::Connection {
                    stream,
                    handler: Arc::clone(&handler),
                    shutdown: shutdown.clone(),
                    max_command_bytes: options.max_command_bytes,
                    command_timeout: options.command_timeout,
                    permit,
                };
                shutdown.track(
                    worker::serve_connection(conn).instrument(info_span!("ipc_conn", id = next_id)),
                );
            };

            info!(in_flight = shutdown.in_flight(), "IPC server draining");
            drop(listener);
            shutdown.drain().await;
            info!(served = next_id, "IPC server stopped");
            outcome
        }
        .instrument(span)
        .await
    }
}

/// Build the multi-threaded runtime a server runs on, sized to
/// `options.worker_count()`.
///
/// # Errors
///
/// Returns [`IpcError::Transport`] if the runtime cannot be built.
pub fn build_runtime(options: &ServerOptions) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(options.worker_count())
        .thread_name("sockline-worker")
        .enable_all()
        .build()
        .map_err(|err| IpcError::Transport(format!("failed to build runtime: {err}")))
}

/// Run a server at `path` until a handler returns [`Outcome::Quit`].
///
/// Blocks the calling thread on a runtime from [`build_runtime`] until the
/// drain completes. Must not be called from within another tokio runtime.
///
/// # Errors
///
/// Returns [`IpcError::Transport`] when the runtime cannot be built or the
/// socket cannot be bound; the launcher should exit non-zero.
pub fn run<H: CommandHandler>(
    path: impl AsRef<Path>,
    options: &ServerOptions,
    handler: Arc<H>,
) -> Result<()> {
    build_runtime(options)?.block_on(async {
        let server = IpcServer::bind(path, options.clone())?;
        server.serve(handler).await
    })
}
