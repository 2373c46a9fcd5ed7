//! Collaborator contracts
//!
//! The arbiter never looks inside a protocol. Each protocol is plugged in as a
//! [`ProtocolController`] (RF side) and optionally a [`NetworkAdapter`]
//! (backend link); the modem hardware sits behind a [`ModemAdapter`]. All
//! calls are made from inside `Arbiter::tick` and must not block.
//!
//! Frames crossing the modem boundary are "type-prefixed": the modem frame
//! type byte followed by the payload.

use std::time::Instant;

use dvh_protocol::{ModemStatusFlags, Protocol};

use crate::error::ModemError;

/// Outcome of servicing a controller for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceResult {
    /// The controller queued frames for the modem or the network
    pub produced_output: bool,
    /// The controller wants to key the transmitter this tick
    pub key_down: bool,
}

/// Frames routed through a controller during one tick
///
/// The arbiter fills the inbound side before calling
/// [`ProtocolController::service`] and routes the outbound side afterwards.
#[derive(Debug)]
pub struct ChannelIo<'a> {
    protocol: Protocol,
    now: Instant,
    rf_in: &'a [Vec<u8>],
    net_in: &'a [Vec<u8>],
    to_modem: Vec<Vec<u8>>,
    to_network: Vec<Vec<u8>>,
}

impl<'a> ChannelIo<'a> {
    pub fn new(
        protocol: Protocol,
        now: Instant,
        rf_in: &'a [Vec<u8>],
        net_in: &'a [Vec<u8>],
    ) -> Self {
        Self {
            protocol,
            now,
            rf_in,
            net_in,
            to_modem: Vec::new(),
            to_network: Vec::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Tick time
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Frames the modem received over the air this tick
    pub fn rf_frames(&self) -> &[Vec<u8>] {
        self.rf_in
    }

    /// Frames the network delivered this tick
    pub fn net_frames(&self) -> &[Vec<u8>] {
        self.net_in
    }

    /// Queue a frame for transmission by the modem
    pub fn send_to_modem(&mut self, frame: Vec<u8>) {
        self.to_modem.push(frame);
    }

    /// Queue a frame for the protocol's network
    pub fn send_to_network(&mut self, frame: Vec<u8>) {
        self.to_network.push(frame);
    }

    /// Take the queued outbound frames as (to modem, to network)
    pub fn into_outbound(self) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        (self.to_modem, self.to_network)
    }
}

/// RF-side state machine of one protocol
pub trait ProtocolController: Send {
    /// Whether the controller is in the middle of receiving a transmission
    ///
    /// The arbiter also counts any modem frame of this protocol as activity,
    /// so this only needs to report state the controller holds itself.
    fn has_rf_activity(&self) -> bool;

    /// Process this tick's frames while the protocol owns the channel
    fn service(&mut self, io: &mut ChannelIo<'_>) -> ServiceResult;

    /// Numeric ID of the station currently talking, if known
    fn talker_id(&self) -> Option<u32> {
        None
    }

    /// Called when the protocol loses the channel
    fn reset(&mut self) {}
}

/// Backend network link of one protocol
pub trait NetworkAdapter: Send {
    /// Whether inbound traffic is currently arriving
    fn has_inbound_activity(&mut self) -> bool;

    /// Drain frames received from the network
    fn forward_to_channel(&mut self) -> Vec<Vec<u8>>;

    /// Send a frame received over the air to the network
    fn forward_from_channel(&mut self, frame: &[u8]);
}

/// The modem hardware link
pub trait ModemAdapter: Send {
    /// Read the latest status; an error means the modem is gone
    fn poll(&mut self) -> Result<ModemStatusFlags, ModemError>;

    /// Next received frame for a protocol, if one is waiting
    fn read_frame(&mut self, protocol: Protocol) -> Option<Vec<u8>>;

    /// Queue a frame for transmission
    fn write_frame(&mut self, protocol: Protocol, frame: &[u8]) -> Result<(), ModemError>;

    /// Transmit a CW identification
    fn send_cw_id(&mut self, callsign: &str) -> Result<(), ModemError>;

    /// Switch the modem to a protocol, or to idle with `None`
    fn set_channel_mode(&mut self, protocol: Option<Protocol>) -> Result<(), ModemError>;
}
