//! Remote control: text commands mapped onto arbiter operations
//!
//! Replies are single lines. Success starts with `OK`, failure with
//! `ERR <TAG> <detail>` where the tag is one of the arbiter or parser tags.

use std::time::Instant;

use dvh_protocol::{ModeTarget, RemoteCommand};
use tracing::debug;

use crate::engine::Arbiter;
use crate::error::ArbiterError;
use crate::state::ChannelMode;

/// Maps remote commands onto an [`Arbiter`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteControl;

impl RemoteControl {
    /// Apply a parsed command, returning the success reply
    pub fn execute(
        arbiter: &mut Arbiter,
        command: &RemoteCommand,
        now: Instant,
    ) -> Result<String, ArbiterError> {
        match command {
            RemoteCommand::Mode { target, pin } => {
                let mode = match target {
                    ModeTarget::Idle => ChannelMode::Idle,
                    ModeTarget::Lockout => ChannelMode::Lockout,
                    ModeTarget::Protocol(p) => ChannelMode::Protocol(*p),
                };
                arbiter.set_mode(mode, *pin, now)?;
                Ok(format!("OK mode {}", arbiter.mode().label()))
            }
            RemoteCommand::Enable { protocol, enabled } => {
                arbiter.set_enabled(*protocol, *enabled)?;
                Ok(format!(
                    "OK {} {}",
                    protocol.keyword(),
                    if *enabled { "enabled" } else { "disabled" }
                ))
            }
            RemoteCommand::Status => Ok(Self::status(arbiter)),
        }
    }

    /// Parse and apply one line, always producing a reply
    pub fn handle_line(arbiter: &mut Arbiter, line: &str, now: Instant) -> String {
        let reply = match RemoteCommand::parse(line) {
            Ok(command) => match Self::execute(arbiter, &command, now) {
                Ok(reply) => reply,
                Err(e) => format!("ERR {} {}", e.tag(), e),
            },
            Err(e) => format!("ERR {} {}", e.tag(), e),
        };
        debug!("Remote {:?} -> {}", line.trim(), reply);
        reply
    }

    fn status(arbiter: &Arbiter) -> String {
        let state = arbiter.state();
        let enabled: Vec<&str> = arbiter
            .protocols()
            .filter(|p| arbiter.is_enabled(*p))
            .map(|p| p.keyword())
            .collect();

        format!(
            "OK status mode={} origin={} fixed={} enabled={}",
            state.mode.label(),
            state.origin.map(|o| o.as_str()).unwrap_or("none"),
            state.fixed_mode.map(|p| p.keyword()).unwrap_or("none"),
            if enabled.is_empty() {
                "none".to_string()
            } else {
                enabled.join(",")
            }
        )
    }
}
