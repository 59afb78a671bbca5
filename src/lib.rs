#![forbid(unsafe_code)]

//! Local request/response IPC over Unix domain sockets.
//!
//! A [`server`] binds a socket path and services one command per connection
//! on a bounded worker pool, streaming the reply back in any number of
//! pieces. The [`client`] side sends a command and collects the complete
//! reply, optionally waiting for a busy or not-yet-started server, and can
//! probe a path for a live server without issuing a command.

pub mod client;
pub mod codec;
pub mod config;
pub mod demo;
pub mod errors;
pub mod server;
pub mod transport;

pub use client::{get_active_state, send_command, ActiveState, ConnectOptions};
pub use config::IpcConfig;
pub use errors::{IpcError, Result};
pub use server::{
    run, CommandHandler, IpcServer, Outcome, ReplyChannel, ServerOptions, ServerState,
    ShutdownCoordinator,
};
