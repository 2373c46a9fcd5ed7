//! Digital-Voice Host Protocol Library
//!
//! This crate holds the protocol-level vocabulary shared by the modem host:
//!
//! - **Protocol**: the over-the-air modes one modem can carry (D-Star, DMR,
//!   YSF, P25, NXDN, M17, POCSAG, FM, AX.25)
//! - **Modem framing**: the serial framing spoken by MMDVM-style modems
//! - **Remote commands**: the text-line grammar accepted by the remote
//!   control port
//!
//! Nothing in here performs I/O; the codecs consume and produce bytes.
//!
//! # Example
//!
//! ```rust
//! use dvh_protocol::{Protocol, FrameCodec};
//! use dvh_protocol::frame::{ModemCodec, ModemFrame};
//!
//! let mut codec = ModemCodec::new();
//! codec.push_bytes(&[0xE0, 0x05, 0x20, 0xAA, 0xBB]);
//!
//! match codec.next_frame() {
//!     Some(ModemFrame::Data { protocol, .. }) => assert_eq!(protocol, Protocol::Ysf),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use std::fmt;
use std::str::FromStr;

pub mod command;
pub mod error;
pub mod frame;

pub use command::{ModeTarget, RemoteCommand};
pub use error::{CommandError, ParseError};
pub use frame::{ModemCodec, ModemFrame, ModemRequest, ModemStatusFlags};

/// Identifies one over-the-air protocol the modem can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Protocol {
    /// JARL D-Star digital voice
    DStar,
    /// ETSI Digital Mobile Radio
    Dmr,
    /// Yaesu System Fusion
    Ysf,
    /// APCO Project 25 phase 1
    P25,
    /// NXDN (Kenwood/Icom)
    Nxdn,
    /// M17 open digital radio
    M17,
    /// POCSAG paging (transmit only)
    Pocsag,
    /// Analogue FM repeater
    Fm,
    /// AX.25 packet over the FM path
    Ax25,
}

impl Protocol {
    /// Every protocol, in canonical order
    pub const ALL: [Protocol; 9] = [
        Protocol::DStar,
        Protocol::Dmr,
        Protocol::Ysf,
        Protocol::P25,
        Protocol::Nxdn,
        Protocol::M17,
        Protocol::Pocsag,
        Protocol::Fm,
        Protocol::Ax25,
    ];

    /// Returns the human-readable name used in status output and lock files
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::DStar => "D-Star",
            Protocol::Dmr => "DMR",
            Protocol::Ysf => "YSF",
            Protocol::P25 => "P25",
            Protocol::Nxdn => "NXDN",
            Protocol::M17 => "M17",
            Protocol::Pocsag => "POCSAG",
            Protocol::Fm => "FM",
            Protocol::Ax25 => "AX.25",
        }
    }

    /// Returns the keyword accepted by the remote control port
    pub fn keyword(&self) -> &'static str {
        match self {
            Protocol::DStar => "dstar",
            Protocol::Dmr => "dmr",
            Protocol::Ysf => "ysf",
            Protocol::P25 => "p25",
            Protocol::Nxdn => "nxdn",
            Protocol::M17 => "m17",
            Protocol::Pocsag => "pocsag",
            Protocol::Fm => "fm",
            Protocol::Ax25 => "ax25",
        }
    }

    /// Whether the modem can ever deliver received frames for this protocol
    ///
    /// POCSAG is a transmit-only paging mode.
    pub fn has_rf_receive(&self) -> bool {
        !matches!(self, Protocol::Pocsag)
    }

    /// Mode number understood by the modem's SET_MODE command
    ///
    /// AX.25 shares the FM modulator, so it selects the FM mode.
    pub fn modem_mode(&self) -> u8 {
        match self {
            Protocol::DStar => frame::MODE_DSTAR,
            Protocol::Dmr => frame::MODE_DMR,
            Protocol::Ysf => frame::MODE_YSF,
            Protocol::P25 => frame::MODE_P25,
            Protocol::Nxdn => frame::MODE_NXDN,
            Protocol::Pocsag => frame::MODE_POCSAG,
            Protocol::M17 => frame::MODE_M17,
            Protocol::Fm | Protocol::Ax25 => frame::MODE_FM,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let protocol = match lower.as_str() {
            "dstar" | "d-star" => Protocol::DStar,
            "dmr" => Protocol::Dmr,
            "ysf" | "fusion" => Protocol::Ysf,
            "p25" => Protocol::P25,
            "nxdn" => Protocol::Nxdn,
            "m17" => Protocol::M17,
            "pocsag" => Protocol::Pocsag,
            "fm" => Protocol::Fm,
            "ax25" | "ax.25" => Protocol::Ax25,
            _ => return Err(ParseError::UnknownProtocol(s.trim().to_string())),
        };
        Ok(protocol)
    }
}

/// Trait for streaming codecs that turn a byte stream into frames
pub trait FrameCodec {
    /// The frame type produced by this codec
    type Frame;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete frame from the buffer
    fn next_frame(&mut self) -> Option<Self::Frame>;

    /// Try to extract the next complete frame along with its raw bytes
    fn next_frame_with_bytes(&mut self) -> Option<(Self::Frame, Vec<u8>)>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for host-to-device messages that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}
