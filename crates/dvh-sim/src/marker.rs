//! Presence marker that records instead of touching the filesystem

use std::io;
use std::sync::{Arc, Mutex};

use dvh_mux::PresenceMarker;

use crate::lock;

/// One call made on a [`RecordingMarker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerCall {
    Set(String),
    Clear,
}

#[derive(Debug, Default)]
struct MarkerState {
    current: Option<String>,
    calls: Vec<MarkerCall>,
    failing: bool,
}

#[derive(Debug, Default)]
pub struct RecordingMarker {
    state: Arc<Mutex<MarkerState>>,
}

impl RecordingMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> RecordingMarkerHandle {
        RecordingMarkerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl PresenceMarker for RecordingMarker {
    fn set(&mut self, label: &str) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(MarkerCall::Set(label.to_string()));
        if state.failing {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated marker failure",
            ));
        }
        state.current = Some(label.to_string());
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(MarkerCall::Clear);
        if state.failing {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated marker failure",
            ));
        }
        state.current = None;
        Ok(())
    }
}

/// Cloneable handle to a [`RecordingMarker`]
#[derive(Debug, Clone)]
pub struct RecordingMarkerHandle {
    state: Arc<Mutex<MarkerState>>,
}

impl RecordingMarkerHandle {
    /// Label currently present, if any
    pub fn current(&self) -> Option<String> {
        lock(&self.state).current.clone()
    }

    pub fn is_present(&self) -> bool {
        lock(&self.state).current.is_some()
    }

    pub fn calls(&self) -> Vec<MarkerCall> {
        lock(&self.state).calls.clone()
    }

    /// Make subsequent calls fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }
}
