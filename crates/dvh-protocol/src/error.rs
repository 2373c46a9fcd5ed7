//! Error types for modem framing and remote command parsing

use thiserror::Error;

/// Errors that can occur while parsing modem frames or protocol names
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Buffer is incomplete - need more data
    #[error("incomplete data: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// Invalid frame structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Declared frame length is impossible
    #[error("invalid frame length: {0}")]
    InvalidLength(usize),

    /// Protocol name not recognised
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}

/// Errors produced when a remote control line cannot be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Blank line
    #[error("empty command")]
    Empty,

    /// First word is not a known command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Protocol keyword not recognised
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Mode target is neither a protocol nor a channel state
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Wrong number or shape of arguments
    #[error("malformed command: {0}")]
    Malformed(String),
}

impl CommandError {
    /// Wire tag returned to remote clients
    pub fn tag(&self) -> &'static str {
        match self {
            Self::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
            Self::InvalidMode(_) => "INVALID_MODE",
            Self::Empty | Self::UnknownCommand(_) | Self::Malformed(_) => "MALFORMED",
        }
    }
}

impl From<ParseError> for CommandError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::UnknownProtocol(name) => Self::UnknownProtocol(name),
            other => Self::Malformed(other.to_string()),
        }
    }
}
