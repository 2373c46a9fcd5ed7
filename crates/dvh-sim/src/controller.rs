//! Scriptable protocol controller
//!
//! Echoes traffic (RF frames to the network, network frames to the modem)
//! and reports the RF activity and talker ID its handle has been told to.

use std::sync::{Arc, Mutex};

use dvh_mux::{ChannelIo, ProtocolController, ServiceResult};

use crate::lock;

#[derive(Debug, Default)]
struct ControllerState {
    rf_active: bool,
    talker: Option<u32>,
    key_down: bool,
    services: usize,
    resets: usize,
    rf_seen: Vec<Vec<u8>>,
    net_seen: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct ScriptedController {
    state: Arc<Mutex<ControllerState>>,
}

impl ScriptedController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ScriptedControllerHandle {
        ScriptedControllerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl ProtocolController for ScriptedController {
    fn has_rf_activity(&self) -> bool {
        lock(&self.state).rf_active
    }

    fn service(&mut self, io: &mut ChannelIo<'_>) -> ServiceResult {
        let rf = io.rf_frames().to_vec();
        let net = io.net_frames().to_vec();
        let produced_output = !rf.is_empty() || !net.is_empty();

        let key_down = {
            let mut state = lock(&self.state);
            state.services += 1;
            state.rf_seen.extend(rf.iter().cloned());
            state.net_seen.extend(net.iter().cloned());
            state.key_down && !net.is_empty()
        };

        for frame in rf {
            io.send_to_network(frame);
        }
        for frame in net {
            io.send_to_modem(frame);
        }

        ServiceResult {
            produced_output,
            key_down,
        }
    }

    fn talker_id(&self) -> Option<u32> {
        lock(&self.state).talker
    }

    fn reset(&mut self) {
        let mut state = lock(&self.state);
        state.resets += 1;
        state.talker = None;
    }
}

/// Cloneable handle to a [`ScriptedController`]
#[derive(Debug, Clone)]
pub struct ScriptedControllerHandle {
    state: Arc<Mutex<ControllerState>>,
}

impl ScriptedControllerHandle {
    /// Report (or stop reporting) an RF transmission in progress
    pub fn set_rf_active(&self, active: bool) {
        lock(&self.state).rf_active = active;
    }

    pub fn set_talker(&self, talker: Option<u32>) {
        lock(&self.state).talker = talker;
    }

    /// Request key-down on every tick that carries network frames
    pub fn set_key_down(&self, key_down: bool) {
        lock(&self.state).key_down = key_down;
    }

    /// Number of times the controller was serviced
    pub fn services(&self) -> usize {
        lock(&self.state).services
    }

    /// Number of times the controller lost the channel
    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    pub fn rf_seen(&self) -> Vec<Vec<u8>> {
        lock(&self.state).rf_seen.clone()
    }

    pub fn net_seen(&self) -> Vec<Vec<u8>> {
        lock(&self.state).net_seen.clone()
    }
}
