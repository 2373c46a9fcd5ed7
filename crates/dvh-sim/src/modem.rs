//! Virtual modem
//!
//! Stands in for the serial modem. Received RF frames and status flags are
//! injected through a [`SimModemHandle`]; everything the arbiter sends is
//! recorded for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dvh_mux::{ModemAdapter, ModemError};
use dvh_protocol::{ModemStatusFlags, Protocol};
use tracing::debug;

use crate::lock;

#[derive(Debug, Default)]
struct SimModemState {
    rx: HashMap<Protocol, VecDeque<Vec<u8>>>,
    status: ModemStatusFlags,
    failed: bool,
    written: Vec<(Protocol, Vec<u8>)>,
    cw_ids: Vec<String>,
    mode_changes: Vec<Option<Protocol>>,
}

/// A simulated modem
#[derive(Debug, Default)]
pub struct SimModem {
    state: Arc<Mutex<SimModemState>>,
}

impl SimModem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for scripting and inspecting this modem
    pub fn handle(&self) -> SimModemHandle {
        SimModemHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl ModemAdapter for SimModem {
    fn poll(&mut self) -> Result<ModemStatusFlags, ModemError> {
        let state = lock(&self.state);
        if state.failed {
            Err(ModemError::Disconnected)
        } else {
            Ok(state.status)
        }
    }

    fn read_frame(&mut self, protocol: Protocol) -> Option<Vec<u8>> {
        lock(&self.state)
            .rx
            .get_mut(&protocol)
            .and_then(|queue| queue.pop_front())
    }

    fn write_frame(&mut self, protocol: Protocol, frame: &[u8]) -> Result<(), ModemError> {
        let mut state = lock(&self.state);
        if state.failed {
            return Err(ModemError::Disconnected);
        }
        debug!("Sim modem TX {}: {:02X?}", protocol, frame);
        state.written.push((protocol, frame.to_vec()));
        Ok(())
    }

    fn send_cw_id(&mut self, callsign: &str) -> Result<(), ModemError> {
        let mut state = lock(&self.state);
        if state.failed {
            return Err(ModemError::Disconnected);
        }
        debug!("Sim modem CW ID {}", callsign);
        state.cw_ids.push(callsign.to_string());
        Ok(())
    }

    fn set_channel_mode(&mut self, protocol: Option<Protocol>) -> Result<(), ModemError> {
        let mut state = lock(&self.state);
        if state.failed {
            return Err(ModemError::Disconnected);
        }
        state.mode_changes.push(protocol);
        Ok(())
    }
}

/// Cloneable handle to a [`SimModem`]
#[derive(Debug, Clone)]
pub struct SimModemHandle {
    state: Arc<Mutex<SimModemState>>,
}

impl SimModemHandle {
    /// Queue a frame as if it had been received over the air
    pub fn inject_rf(&self, protocol: Protocol, frame: Vec<u8>) {
        lock(&self.state)
            .rx
            .entry(protocol)
            .or_default()
            .push_back(frame);
    }

    /// Frames still waiting to be read for a protocol
    pub fn pending_rf(&self, protocol: Protocol) -> usize {
        lock(&self.state).rx.get(&protocol).map_or(0, VecDeque::len)
    }

    pub fn set_status(&self, status: ModemStatusFlags) {
        lock(&self.state).status = status;
    }

    /// Make every subsequent call fail as if the modem were unplugged
    pub fn set_failed(&self, failed: bool) {
        lock(&self.state).failed = failed;
    }

    /// Frames the arbiter wrote, in order
    pub fn written(&self) -> Vec<(Protocol, Vec<u8>)> {
        lock(&self.state).written.clone()
    }

    pub fn cw_ids(&self) -> Vec<String> {
        lock(&self.state).cw_ids.clone()
    }

    /// Every channel mode the modem was switched to
    pub fn mode_changes(&self) -> Vec<Option<Protocol>> {
        lock(&self.state).mode_changes.clone()
    }

    /// The mode the modem was last switched to (`None` for idle or never)
    pub fn last_mode(&self) -> Option<Protocol> {
        lock(&self.state).mode_changes.last().copied().flatten()
    }

    /// Forget recorded output
    pub fn clear_recorded(&self) {
        let mut state = lock(&self.state);
        state.written.clear();
        state.cw_ids.clear();
        state.mode_changes.clear();
    }
}
