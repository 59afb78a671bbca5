//! Demo command set served by `sockline-daemon`.
//!
//! Exercises the reply paths a real application needs: a short answer, one
//! large buffer, many small emits and a slow trickle, plus a ballast echo that
//! detects crossed streams between concurrent clients.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::server::{CommandHandler, Outcome, ReplyChannel};
use crate::{IpcError, Result};

/// Rows emitted by `big` and `chunk`.
pub const BIG_ROWS: usize = 10_000;

/// Rows emitted by `slow`.
pub const SLOW_ROWS: usize = 1_000;

/// Pause after each `slow` row.
pub const SLOW_DELAY: Duration = Duration::from_millis(10);

/// Length of one `big:` row including the newline.
pub const ROW_LEN: usize = 81;

const SENDBYTES_PREFIX: &str = "sendbytes ";

/// One `big:` row: the row number zero-padded to 75 digits.
#[must_use]
pub fn row(n: usize) -> String {
    format!("big: {n:075}\n")
}

/// Response to `sendbytes <ballast>`.
///
/// A ballast of one repeated byte yields `rcvd:<byte><len:08>`; otherwise the
/// number of bytes that differ from the first is reported as `errs:<n>`.
#[must_use]
pub fn ballast_report(ballast: &str) -> String {
    let bytes = ballast.as_bytes();
    let Some(&first) = bytes.first() else {
        return "rcvd:?00000000\n".to_owned();
    };
    let errs = bytes[1..].iter().filter(|&&b| b != first).count();
    if errs > 0 {
        format!("errs:{errs}\n")
    } else {
        format!("rcvd:{}{:08}\n", char::from(first), bytes.len())
    }
}

/// The demo application.
///
/// [`DemoApp::new`] allocates the instance and records its address before
/// any command is served. A command that arrives on any other instance,
/// including a clone, fails with [`IpcError::Application`].
#[derive(Debug, Clone)]
pub struct DemoApp {
    expected: usize,
}

impl DemoApp {
    /// Allocate an application instance bound to its own address.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|slot| Self {
            expected: slot.as_ptr() as usize,
        })
    }

    fn check_identity(&self) -> Result<()> {
        let actual = std::ptr::from_ref(self) as usize;
        if actual == self.expected {
            Ok(())
        } else {
            error!(expected = self.expected, actual, "application context changed");
            Err(IpcError::Application(
                "application context pointer changed between calls".into(),
            ))
        }
    }
}

impl CommandHandler for DemoApp {
    async fn handle(&self, command: &str, reply: &mut ReplyChannel) -> Result<Outcome> {
        self.check_identity()?;

        match command {
            "quit" => return Ok(Outcome::Quit),
            "ping" => reply.emit_str("pong").await?,
            "big" => {
                let mut buf = String::with_capacity(BIG_ROWS * ROW_LEN);
                for n in 0..BIG_ROWS {
                    buf.push_str(&row(n));
                }
                reply.emit_str(&buf).await?;
            }
            "chunk" => {
                for n in 0..BIG_ROWS {
                    reply.emit_str(&row(n)).await?;
                }
            }
            "slow" => {
                for n in 0..SLOW_ROWS {
                    reply.emit_str(&row(n)).await?;
                    tokio::time::sleep(SLOW_DELAY).await;
                }
            }
            _ => {
                if let Some(ballast) = command.strip_prefix(SENDBYTES_PREFIX) {
                    debug!(len = ballast.len(), "sendbytes");
                    reply.emit_str(&ballast_report(ballast)).await?;
                } else {
                    reply
                        .emit_str(&format!("unhandled command: {command}"))
                        .await?;
                }
            }
        }

        Ok(Outcome::Done)
    }
}
