//! Arbiter events and the sinks that consume them
//!
//! The arbiter emits events synchronously from inside `tick` and the command
//! operations. A sink must not block.

use dvh_protocol::Protocol;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::{ChannelMode, Origin};

/// Something observable the arbiter did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterEvent {
    /// The channel changed hands
    ModeChanged {
        /// Previous mode
        from: ChannelMode,
        /// New mode
        to: ChannelMode,
        /// Source of the new claim (None when released)
        origin: Option<Origin>,
    },

    /// Free-text diagnostic
    Message(String),

    /// A protocol was enabled or disabled
    ProtocolEnabled { protocol: Protocol, enabled: bool },

    /// A CW identification was transmitted
    CwIdSent { callsign: String },

    /// A key-down was refused by the TX guard
    KeyDownRefused {
        protocol: Protocol,
        /// Time remaining on the guard (milliseconds)
        remaining_ms: u64,
    },
}

impl ArbiterEvent {
    /// Check if this event changed the channel mode
    pub fn is_mode_change(&self) -> bool {
        matches!(self, ArbiterEvent::ModeChanged { .. })
    }

    /// The mode this event moved the channel into
    pub fn new_mode(&self) -> Option<ChannelMode> {
        match self {
            ArbiterEvent::ModeChanged { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Consumer of arbiter events
pub trait EventSink: Send {
    fn emit(&mut self, event: ArbiterEvent);
}

/// Writes every event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, event: ArbiterEvent) {
        match event {
            ArbiterEvent::ModeChanged { from, to, origin } => match origin {
                Some(origin) => info!("Mode {} -> {} ({})", from, to, origin.as_str()),
                None => info!("Mode {} -> {}", from, to),
            },
            ArbiterEvent::Message(text) => info!("{}", text),
            ArbiterEvent::ProtocolEnabled { protocol, enabled } => {
                info!(
                    "{} {}",
                    protocol,
                    if enabled { "enabled" } else { "disabled" }
                )
            }
            ArbiterEvent::CwIdSent { callsign } => info!("CW ID sent: {}", callsign),
            ArbiterEvent::KeyDownRefused {
                protocol,
                remaining_ms,
            } => info!(
                "{} key-down refused, TX guard has {}ms left",
                protocol, remaining_ms
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: ArbiterEvent) {}
}

impl EventSink for mpsc::Sender<ArbiterEvent> {
    fn emit(&mut self, event: ArbiterEvent) {
        match self.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event channel closed");
            }
        }
    }
}
