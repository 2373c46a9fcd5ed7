//! Error types for the arbiter and its collaborators

use dvh_protocol::Protocol;
use thiserror::Error;

/// Errors returned by arbiter operations
///
/// All of these leave the arbiter in the state it had before the call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// Target mode cannot be selected (unregistered protocol, or the
    /// channel is locked out or in error)
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Fixed mode pins the channel to another protocol
    #[error("channel is fixed to {pinned}, {requested} refused")]
    FixedModeViolation {
        /// Protocol the channel is pinned to
        pinned: Protocol,
        /// Protocol that was requested
        requested: Protocol,
    },

    /// Protocol is not registered with the arbiter
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Protocol is registered but currently disabled
    #[error("protocol disabled: {0}")]
    ProtocolDisabled(Protocol),

    /// DMR key-down refused while the TX guard runs
    #[error("TX guard active for another {remaining_ms}ms")]
    TxGuardActive {
        /// Time remaining on the guard (milliseconds)
        remaining_ms: u64,
    },

    /// The arbiter stopped after a fatal failure or shutdown
    #[error("arbiter halted: {0}")]
    Halted(String),

    /// Modem failed while the arbiter was being set up
    #[error("modem error: {0}")]
    Modem(#[from] ModemError),
}

impl ArbiterError {
    /// Wire tag returned to remote clients
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidMode(_) | Self::ProtocolDisabled(_) => "INVALID_MODE",
            Self::FixedModeViolation { .. } => "FIXED_MODE_VIOLATION",
            Self::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
            Self::TxGuardActive { .. } => "TX_GUARD",
            Self::Halted(_) | Self::Modem(_) => "HALTED",
        }
    }
}

/// Errors from the modem adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// The serial port or UDP socket could not be opened
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// The link to the modem has gone away
    #[error("modem disconnected")]
    Disconnected,

    /// Outbound queue to the modem is full; the frame was not sent
    #[error("modem transmit queue full")]
    QueueFull,
}

/// Errors loading an ID lookup table
#[derive(Debug, Error)]
pub enum LookupError {
    /// Table file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
