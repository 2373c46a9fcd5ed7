//! Digital-Voice Host Simulation Library
//!
//! This crate provides in-memory stand-ins for the collaborators the mode
//! arbiter talks to, so the arbiter can be exercised (and the host run)
//! without a modem or gateways:
//!
//! - **SimModem**: a modem whose received frames, status and failures are
//!   scripted through a [`SimModemHandle`]
//! - **SimNetwork**: a gateway link with injectable inbound traffic
//! - **RecordingMarker**: a presence marker that remembers every call
//! - **ScriptedController**: a protocol controller that echoes frames and
//!   reports whatever activity its handle says
//!
//! Each simulated part is moved into the arbiter; the matching handle is
//! cloned and kept by the test to drive and inspect it.
//!
//! # Example
//!
//! ```rust
//! use dvh_mux::ModemAdapter;
//! use dvh_protocol::Protocol;
//! use dvh_sim::SimModem;
//!
//! let mut modem = SimModem::new();
//! let handle = modem.handle();
//!
//! handle.inject_rf(Protocol::Dmr, vec![0x18, 0x01, 0x02]);
//! assert_eq!(modem.read_frame(Protocol::Dmr), Some(vec![0x18, 0x01, 0x02]));
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod controller;
pub mod marker;
pub mod modem;
pub mod network;

pub use controller::{ScriptedController, ScriptedControllerHandle};
pub use marker::{MarkerCall, RecordingMarker, RecordingMarkerHandle};
pub use modem::{SimModem, SimModemHandle};
pub use network::{SimNetwork, SimNetworkHandle};

/// Lock shared simulation state, ignoring poisoning from a panicked test
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
