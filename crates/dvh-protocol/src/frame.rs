//! MMDVM Modem Serial Framing
//!
//! The modem speaks a length-prefixed binary framing over its serial link.
//!
//! # Frame Format
//! ```text
//! E0 [len] [type] [payload...]            len = whole frame, 3..=255
//! E1 [len_hi] [len_lo] [type] [payload...] len = whole frame, up to 0xFFFF
//! ```
//!
//! Received data frames are handed to the rest of the host as
//! "type-prefixed" frames: the frame type byte followed by the payload.
//! Outbound frames use the same shape so the frame type selects the modem
//! queue (for example the DMR time slot).
//!
//! # Status Frame
//! The payload of a GET_STATUS reply starts with the enabled-modes bitmap,
//! the modem state (one of the `MODE_*` values) and a flags byte.

use crate::error::ParseError;
use crate::{EncodeCommand, FrameCodec, Protocol};

/// Start byte of a short frame
pub const FRAME_START: u8 = 0xE0;
/// Start byte of a long frame (16-bit length)
pub const FRAME_START_LONG: u8 = 0xE1;

/// Maximum frame length accepted from the modem
const MAX_FRAME_LEN: usize = 2048;

/// Largest payload that fits a long frame of `MAX_FRAME_LEN`
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 4;

pub const GET_VERSION: u8 = 0x00;
pub const GET_STATUS: u8 = 0x01;
pub const SET_CONFIG: u8 = 0x02;
pub const SET_MODE: u8 = 0x03;
pub const SEND_CWID: u8 = 0x0A;

pub const DSTAR_HEADER: u8 = 0x10;
pub const DSTAR_DATA: u8 = 0x11;
pub const DSTAR_LOST: u8 = 0x12;
pub const DSTAR_EOT: u8 = 0x13;

pub const DMR_DATA1: u8 = 0x18;
pub const DMR_LOST1: u8 = 0x19;
pub const DMR_DATA2: u8 = 0x1A;
pub const DMR_LOST2: u8 = 0x1B;
pub const DMR_SHORTLC: u8 = 0x1C;
pub const DMR_START: u8 = 0x1D;

pub const YSF_DATA: u8 = 0x20;
pub const YSF_LOST: u8 = 0x21;

pub const P25_HDR: u8 = 0x30;
pub const P25_LDU: u8 = 0x31;
pub const P25_LOST: u8 = 0x32;

pub const NXDN_DATA: u8 = 0x40;
pub const NXDN_LOST: u8 = 0x41;

pub const M17_LINK_SETUP: u8 = 0x45;
pub const M17_STREAM: u8 = 0x46;
pub const M17_PACKET: u8 = 0x47;
pub const M17_LOST: u8 = 0x48;
pub const M17_EOT: u8 = 0x49;

pub const POCSAG_DATA: u8 = 0x50;

pub const AX25_DATA: u8 = 0x55;

pub const FM_DATA: u8 = 0x65;
pub const FM_STATUS: u8 = 0x66;
pub const FM_EOT: u8 = 0x67;

pub const ACK: u8 = 0x70;
pub const NAK: u8 = 0x7F;

pub const MODE_IDLE: u8 = 0;
pub const MODE_DSTAR: u8 = 1;
pub const MODE_DMR: u8 = 2;
pub const MODE_YSF: u8 = 3;
pub const MODE_P25: u8 = 4;
pub const MODE_NXDN: u8 = 5;
pub const MODE_POCSAG: u8 = 6;
pub const MODE_M17: u8 = 7;
pub const MODE_FM: u8 = 10;
pub const MODE_LOCKOUT: u8 = 99;
pub const MODE_ERROR: u8 = 100;

const FLAG_TX: u8 = 0x01;
const FLAG_LOCKOUT: u8 = 0x10;
const FLAG_CARRIER: u8 = 0x40;

/// Maximum CW identification payload
pub const MAX_CWID_LEN: usize = 200;

/// Status flags reported by the modem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemStatusFlags {
    /// Transmitter keyed
    pub tx: bool,
    /// Carrier detected on the receiver
    pub carrier: bool,
    /// Hardware lockout input asserted
    pub lockout: bool,
    /// Modem reports an internal error state
    pub error: bool,
}

impl ModemStatusFlags {
    fn from_payload(payload: &[u8]) -> Self {
        let state = payload.get(1).copied().unwrap_or(MODE_IDLE);
        let flags = payload.get(2).copied().unwrap_or(0);
        Self {
            tx: flags & FLAG_TX != 0,
            carrier: flags & FLAG_CARRIER != 0,
            lockout: flags & FLAG_LOCKOUT != 0 || state == MODE_LOCKOUT,
            error: state == MODE_ERROR,
        }
    }
}

/// A frame received from the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemFrame {
    /// Reply to GET_VERSION
    Version {
        protocol_version: u8,
        description: String,
    },
    /// Reply to GET_STATUS
    Status(ModemStatusFlags),
    /// Received over-the-air data for one protocol
    Data {
        protocol: Protocol,
        frame_type: u8,
        payload: Vec<u8>,
    },
    /// Receiver lost the signal mid-transmission
    Lost { protocol: Protocol },
    /// Positive acknowledgement of a host command
    Ack { command: u8 },
    /// Negative acknowledgement of a host command
    Nak { command: u8, reason: u8 },
    /// Frame type this host does not interpret
    Unknown { frame_type: u8, payload: Vec<u8> },
}

impl ModemFrame {
    /// The type-prefixed form of a data frame, as delivered to controllers
    pub fn to_type_prefixed(&self) -> Option<Vec<u8>> {
        match self {
            ModemFrame::Data {
                frame_type,
                payload,
                ..
            } => {
                let mut out = Vec::with_capacity(payload.len() + 1);
                out.push(*frame_type);
                out.extend_from_slice(payload);
                Some(out)
            }
            _ => None,
        }
    }
}

/// Map a received data frame type to its protocol
pub fn data_protocol(frame_type: u8) -> Option<Protocol> {
    match frame_type {
        DSTAR_HEADER | DSTAR_DATA | DSTAR_EOT => Some(Protocol::DStar),
        DMR_DATA1 | DMR_DATA2 => Some(Protocol::Dmr),
        YSF_DATA => Some(Protocol::Ysf),
        P25_HDR | P25_LDU => Some(Protocol::P25),
        NXDN_DATA => Some(Protocol::Nxdn),
        M17_LINK_SETUP | M17_STREAM | M17_PACKET | M17_EOT => Some(Protocol::M17),
        POCSAG_DATA => Some(Protocol::Pocsag),
        AX25_DATA => Some(Protocol::Ax25),
        FM_DATA | FM_STATUS | FM_EOT => Some(Protocol::Fm),
        _ => None,
    }
}

/// Map a "signal lost" frame type to its protocol
pub fn lost_protocol(frame_type: u8) -> Option<Protocol> {
    match frame_type {
        DSTAR_LOST => Some(Protocol::DStar),
        DMR_LOST1 | DMR_LOST2 => Some(Protocol::Dmr),
        YSF_LOST => Some(Protocol::Ysf),
        P25_LOST => Some(Protocol::P25),
        NXDN_LOST => Some(Protocol::Nxdn),
        M17_LOST => Some(Protocol::M17),
        _ => None,
    }
}

/// Default outbound frame type for a protocol's voice/data stream
pub fn default_tx_type(protocol: Protocol) -> u8 {
    match protocol {
        Protocol::DStar => DSTAR_DATA,
        Protocol::Dmr => DMR_DATA2,
        Protocol::Ysf => YSF_DATA,
        Protocol::P25 => P25_LDU,
        Protocol::Nxdn => NXDN_DATA,
        Protocol::M17 => M17_STREAM,
        Protocol::Pocsag => POCSAG_DATA,
        Protocol::Fm => FM_DATA,
        Protocol::Ax25 => AX25_DATA,
    }
}

/// A command sent from the host to the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemRequest {
    /// Ask for firmware version and description
    GetVersion,
    /// Ask for the status flags
    GetStatus,
    /// Switch the modem's operating mode (`MODE_*`)
    SetMode(u8),
    /// Transmit a CW identification
    SendCwId(String),
    /// Queue over-the-air data
    Data { frame_type: u8, payload: Vec<u8> },
}

impl ModemRequest {
    /// Build a data request from a type-prefixed frame
    ///
    /// Frames without a type byte are sent with the protocol's default type.
    pub fn from_type_prefixed(protocol: Protocol, frame: &[u8]) -> Self {
        match frame.split_first() {
            Some((&frame_type, payload)) if data_protocol(frame_type) == Some(protocol) => {
                Self::Data {
                    frame_type,
                    payload: payload.to_vec(),
                }
            }
            _ => Self::Data {
                frame_type: default_tx_type(protocol),
                payload: frame.to_vec(),
            },
        }
    }

    fn frame_type(&self) -> u8 {
        match self {
            Self::GetVersion => GET_VERSION,
            Self::GetStatus => GET_STATUS,
            Self::SetMode(_) => SET_MODE,
            Self::SendCwId(_) => SEND_CWID,
            Self::Data { frame_type, .. } => *frame_type,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::GetVersion | Self::GetStatus => Vec::new(),
            Self::SetMode(mode) => vec![*mode],
            Self::SendCwId(callsign) => callsign
                .bytes()
                .take(MAX_CWID_LEN)
                .collect(),
            Self::Data { payload, .. } => {
                if payload.len() > MAX_PAYLOAD_LEN {
                    tracing::debug!(
                        "Truncating {} byte payload to {}",
                        payload.len(),
                        MAX_PAYLOAD_LEN
                    );
                }
                payload[..payload.len().min(MAX_PAYLOAD_LEN)].to_vec()
            }
        }
    }
}

impl EncodeCommand for ModemRequest {
    fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let short_len = payload.len() + 3;

        let mut out;
        if short_len <= 0xFF {
            out = Vec::with_capacity(short_len);
            out.push(FRAME_START);
            out.push(short_len as u8);
        } else {
            // payload() never exceeds MAX_PAYLOAD_LEN, so this fits in u16
            let long_len = payload.len() + 4;
            out = Vec::with_capacity(long_len);
            out.push(FRAME_START_LONG);
            out.extend_from_slice(&(long_len as u16).to_be_bytes());
        }
        out.push(self.frame_type());
        out.extend_from_slice(&payload);
        out
    }
}

/// Streaming decoder for frames arriving from the modem
#[derive(Debug, Default)]
pub struct ModemCodec {
    buffer: Vec<u8>,
}

impl ModemCodec {
    /// Create a new modem codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
        }
    }

    /// Number of buffered, not yet framed bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn find_start(&self) -> Option<usize> {
        self.buffer
            .iter()
            .position(|&b| b == FRAME_START || b == FRAME_START_LONG)
    }

    /// Header length and declared total length of the frame at the buffer head
    fn header(&self) -> Result<Option<(usize, usize)>, ParseError> {
        let (header_len, total) = match self.buffer.first() {
            Some(&FRAME_START) => match self.buffer.get(1) {
                Some(&len) => (3, len as usize),
                None => return Ok(None),
            },
            Some(&FRAME_START_LONG) => match (self.buffer.get(1), self.buffer.get(2)) {
                (Some(&hi), Some(&lo)) => (4, u16::from_be_bytes([hi, lo]) as usize),
                _ => return Ok(None),
            },
            _ => return Err(ParseError::InvalidFrame("missing start byte".into())),
        };

        if total < header_len || total > MAX_FRAME_LEN {
            return Err(ParseError::InvalidLength(total));
        }
        Ok(Some((header_len, total)))
    }

    fn parse_frame(frame_type: u8, payload: &[u8]) -> ModemFrame {
        if let Some(protocol) = data_protocol(frame_type) {
            return ModemFrame::Data {
                protocol,
                frame_type,
                payload: payload.to_vec(),
            };
        }
        if let Some(protocol) = lost_protocol(frame_type) {
            return ModemFrame::Lost { protocol };
        }

        match frame_type {
            GET_VERSION => ModemFrame::Version {
                protocol_version: payload.first().copied().unwrap_or(0),
                description: payload
                    .get(1..)
                    .map(|d| String::from_utf8_lossy(d).trim_end_matches('\0').to_string())
                    .unwrap_or_default(),
            },
            GET_STATUS => ModemFrame::Status(ModemStatusFlags::from_payload(payload)),
            ACK => ModemFrame::Ack {
                command: payload.first().copied().unwrap_or(0),
            },
            NAK => ModemFrame::Nak {
                command: payload.first().copied().unwrap_or(0),
                reason: payload.get(1).copied().unwrap_or(0),
            },
            _ => ModemFrame::Unknown {
                frame_type,
                payload: payload.to_vec(),
            },
        }
    }
}

impl FrameCodec for ModemCodec {
    type Frame = ModemFrame;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Prevent buffer overflow
        if self.buffer.len() > MAX_FRAME_LEN * 4 {
            let start = self.buffer.len() - MAX_FRAME_LEN;
            self.buffer.drain(..start);
        }
    }

    fn next_frame(&mut self) -> Option<Self::Frame> {
        self.next_frame_with_bytes().map(|(frame, _)| frame)
    }

    fn next_frame_with_bytes(&mut self) -> Option<(Self::Frame, Vec<u8>)> {
        loop {
            let start = self.find_start();
            let Some(start) = start else {
                self.buffer.clear();
                return None;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            match self.header() {
                Ok(Some((header_len, total))) => {
                    if self.buffer.len() < total {
                        return None;
                    }
                    let raw: Vec<u8> = self.buffer.drain(..total).collect();
                    let frame_type = raw[header_len - 1];
                    let frame = Self::parse_frame(frame_type, &raw[header_len..]);
                    return Some((frame, raw));
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::debug!("Discarding modem byte: {}", e);
                    self.buffer.drain(..1);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}
