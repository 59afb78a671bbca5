//! Application callback contract.

use std::future::Future;

use crate::server::reply::ReplyChannel;
use crate::Result;

/// What the server does after a handler returns successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reply is complete.
    Done,
    /// Stop accepting connections and drain. Carries no reply payload.
    Quit,
}

/// Application logic behind a server.
///
/// One value is shared by every connection for the whole run, so `&self` is
/// the same object on every call. The server adds no locking around it; any
/// interior mutability is the implementor's to synchronize.
///
/// Returning `Err` fails only the current command: the client sees an
/// incomplete reply and the server keeps serving. Handlers should not block
/// the executor thread; use async I/O and timers.
///
/// # Example
///
/// ```rust,ignore
/// struct Echo;
///
/// impl CommandHandler for Echo {
///     async fn handle(&self, command: &str, reply: &mut ReplyChannel) -> Result<Outcome> {
///         reply.emit_str(command).await?;
///         Ok(Outcome::Done)
///     }
/// }
/// ```
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle one command, streaming the reply through `reply`.
    fn handle(
        &self,
        command: &str,
        reply: &mut ReplyChannel,
    ) -> impl Future<Output = Result<Outcome>> + Send;
}
