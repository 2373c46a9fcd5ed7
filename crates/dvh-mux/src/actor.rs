//! Arbiter tick loop
//!
//! The loop owns the [`Arbiter`] and is the only place that touches it.
//! Remote commands arrive over a channel and are applied between ticks, so
//! a tick always runs to completion with a consistent view of the enabled
//! flags.
//!
//! # Example
//!
//! ```rust,ignore
//! use dvh_mux::actor::{run_arbiter, HostCommand};
//! use tokio::sync::{mpsc, oneshot};
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(32);
//! let task = tokio::spawn(run_arbiter(arbiter, cmd_rx, Duration::from_millis(10)));
//!
//! let (response, reply) = oneshot::channel();
//! cmd_tx.send(HostCommand::Remote { line: "status".into(), response }).await?;
//! println!("{}", reply.await?);
//!
//! cmd_tx.send(HostCommand::Shutdown).await?;
//! task.await??;
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::Arbiter;
use crate::error::ArbiterError;
use crate::remote::RemoteControl;

/// Commands sent to the tick loop
#[derive(Debug)]
pub enum HostCommand {
    /// A remote control line and where to send the reply
    Remote {
        line: String,
        response: oneshot::Sender<String>,
    },

    /// Release the channel and stop
    Shutdown,
}

/// Run the arbiter until shutdown or a fatal modem failure
///
/// Returns `Ok(())` after a requested shutdown (or when every command
/// sender has gone away) and `Err(ArbiterError::Halted)` when the arbiter
/// entered the error state. The presence marker is cleared either way.
pub async fn run_arbiter(
    mut arbiter: Arbiter,
    mut cmd_rx: mpsc::Receiver<HostCommand>,
    tick: Duration,
) -> Result<(), ArbiterError> {
    info!("Arbiter loop started ({}ms tick)", tick.as_millis());

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(HostCommand::Remote { line, response }) => {
                        let reply = RemoteControl::handle_line(
                            &mut arbiter,
                            &line,
                            Instant::now().into_std(),
                        );
                        if response.send(reply).is_err() {
                            debug!("Remote client went away before the reply");
                        }
                    }
                    Some(HostCommand::Shutdown) => {
                        info!("Shutdown requested");
                        break Ok(());
                    }
                    None => {
                        debug!("Command channel closed");
                        break Ok(());
                    }
                }
            }

            at = ticker.tick() => {
                arbiter.tick(at.into_std());
                if arbiter.is_halted() {
                    break Err(ArbiterError::Halted(
                        "modem failure, channel in ERROR".to_string(),
                    ));
                }
            }
        }
    };

    arbiter.shutdown();
    info!("Arbiter loop ended");
    result
}
