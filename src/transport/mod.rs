//! Unix domain socket transport.
//!
//! - [`listener`]: bind/accept on the server side, stale-socket reclaim and
//!   cleanup on drop.
//! - [`connect`]: non-blocking client connects with failure classification.
//! - [`probe`]: connect-only liveness check.
//! - [`path`]: validation and resolution of socket paths that exceed the
//!   socket address limit.

pub mod connect;
pub mod listener;
pub mod path;
pub mod probe;

pub use listener::SocketListener;
pub use probe::{probe, ActiveState};
