//! Pass-through controller for protocols without a dedicated state machine
//!
//! `FrameRelay` forwards received RF frames to the network and network frames
//! to the modem. It keeps a protocol's channel claim alive for a short window
//! after each frame so a transmission with small gaps is one activity.

use std::time::{Duration, Instant};

use dvh_protocol::frame::data_protocol;
use dvh_protocol::Protocol;
use tracing::{debug, trace};

use crate::channel::{ChannelIo, ProtocolController, ServiceResult};

/// Default gap tolerated inside one transmission
pub const DEFAULT_ACTIVITY_WINDOW: Duration = Duration::from_millis(500);

/// Relays frames between modem and network
#[derive(Debug, Clone)]
pub struct FrameRelay {
    protocol: Protocol,
    window: Duration,
    last_rf: Option<Instant>,
    last_net: Option<Instant>,
    rf_active: bool,
    transmitting: bool,
}

impl FrameRelay {
    pub fn new(protocol: Protocol) -> Self {
        Self::with_window(protocol, DEFAULT_ACTIVITY_WINDOW)
    }

    pub fn with_window(protocol: Protocol, window: Duration) -> Self {
        Self {
            protocol,
            window,
            last_rf: None,
            last_net: None,
            rf_active: false,
            transmitting: false,
        }
    }

    /// Whether a network-originated transmission is in progress
    pub fn is_transmitting(&self) -> bool {
        self.transmitting
    }

    fn within_window(&self, last: Option<Instant>, now: Instant) -> bool {
        last.is_some_and(|t| now.saturating_duration_since(t) < self.window)
    }
}

impl ProtocolController for FrameRelay {
    fn has_rf_activity(&self) -> bool {
        self.rf_active
    }

    fn service(&mut self, io: &mut ChannelIo<'_>) -> ServiceResult {
        let now = io.now();
        let mut result = ServiceResult::default();

        let rf: Vec<Vec<u8>> = io.rf_frames().to_vec();
        for frame in rf {
            match frame.first() {
                Some(&frame_type) if data_protocol(frame_type) == Some(self.protocol) => {
                    self.last_rf = Some(now);
                    io.send_to_network(frame);
                    result.produced_output = true;
                }
                _ => debug!("{} relay ignoring frame {:02X?}", self.protocol, frame),
            }
        }
        self.rf_active = self.within_window(self.last_rf, now);

        let net: Vec<Vec<u8>> = io.net_frames().to_vec();
        if !net.is_empty() {
            if self.rf_active {
                // Half duplex: the air side has priority
                debug!(
                    "{} relay dropping {} network frame(s) during RF receive",
                    self.protocol,
                    net.len()
                );
            } else {
                if !self.transmitting {
                    trace!("{} relay starting network transmission", self.protocol);
                    self.transmitting = true;
                    result.key_down = true;
                }
                self.last_net = Some(now);
                for frame in net {
                    io.send_to_modem(frame);
                }
                result.produced_output = true;
            }
        }

        if self.transmitting && !self.within_window(self.last_net, now) {
            trace!("{} relay network transmission ended", self.protocol);
            self.transmitting = false;
        }

        result
    }

    fn reset(&mut self) {
        self.last_rf = None;
        self.last_net = None;
        self.rf_active = false;
        self.transmitting = false;
    }
}
