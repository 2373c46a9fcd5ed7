//! Virtual gateway link

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dvh_mux::NetworkAdapter;

use crate::lock;

#[derive(Debug, Default)]
struct SimNetworkState {
    inbound: VecDeque<Vec<u8>>,
    active: bool,
    forwarded: Vec<Vec<u8>>,
}

/// A simulated network adapter
///
/// Reports activity while inbound frames are queued or while the activity
/// latch is set.
#[derive(Debug, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<SimNetworkState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SimNetworkHandle {
        SimNetworkHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl NetworkAdapter for SimNetwork {
    fn has_inbound_activity(&mut self) -> bool {
        let state = lock(&self.state);
        state.active || !state.inbound.is_empty()
    }

    fn forward_to_channel(&mut self) -> Vec<Vec<u8>> {
        lock(&self.state).inbound.drain(..).collect()
    }

    fn forward_from_channel(&mut self, frame: &[u8]) {
        lock(&self.state).forwarded.push(frame.to_vec());
    }
}

/// Cloneable handle to a [`SimNetwork`]
#[derive(Debug, Clone)]
pub struct SimNetworkHandle {
    state: Arc<Mutex<SimNetworkState>>,
}

impl SimNetworkHandle {
    /// Queue a frame as if the gateway had sent it
    pub fn inject(&self, frame: Vec<u8>) {
        lock(&self.state).inbound.push_back(frame);
    }

    pub fn set_active(&self, active: bool) {
        lock(&self.state).active = active;
    }

    /// Inbound frames not yet taken by the arbiter
    pub fn pending(&self) -> usize {
        lock(&self.state).inbound.len()
    }

    /// Frames the arbiter sent towards the gateway
    pub fn forwarded(&self) -> Vec<Vec<u8>> {
        lock(&self.state).forwarded.clone()
    }
}
