//! Presence marker reflecting a busy channel
//!
//! The marker exists exactly while the channel is not idle. Other processes
//! watch it to learn that the modem is in use.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::debug;

/// An externally visible "channel busy" record
pub trait PresenceMarker: Send {
    /// Create or replace the marker with the given mode label
    fn set(&mut self, label: &str) -> io::Result<()>;

    /// Remove the marker; removing an absent marker is not an error
    fn clear(&mut self) -> io::Result<()>;
}

/// Lock file holding the label of the current mode
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PresenceMarker for LockFile {
    fn set(&mut self, label: &str) -> io::Result<()> {
        debug!("Writing lock file {} ({})", self.path.display(), label);
        fs::write(&self.path, format!("{}\n", label))
    }

    fn clear(&mut self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed lock file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Marker used when no lock file is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMarker;

impl PresenceMarker for NoMarker {
    fn set(&mut self, _label: &str) -> io::Result<()> {
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }
}
