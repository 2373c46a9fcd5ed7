//! Channel state and protocol registration

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dvh_protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::channel::{NetworkAdapter, ProtocolController};
use crate::lookup::IdLookup;

/// What currently holds the shared channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Nobody holds the channel
    Idle,
    /// Claims refused until an operator releases the channel
    Lockout,
    /// Modem failure; nothing is serviced
    Error,
    /// One protocol owns the channel
    Protocol(Protocol),
}

impl ChannelMode {
    /// Label used in status replies and lock markers
    pub fn label(&self) -> &'static str {
        match self {
            ChannelMode::Idle => "IDLE",
            ChannelMode::Lockout => "LOCKOUT",
            ChannelMode::Error => "ERROR",
            ChannelMode::Protocol(p) => p.name(),
        }
    }

    /// The owning protocol, if any
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            ChannelMode::Protocol(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ChannelMode::Idle)
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the activity that holds the channel came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Received over the air via the modem
    Rf,
    /// Received from the protocol's network
    Net,
    /// Forced by a remote command or fixed mode
    External,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Rf => "rf",
            Origin::Net => "net",
            Origin::External => "external",
        }
    }
}

/// Snapshot of the shared channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// Current mode
    pub mode: ChannelMode,
    /// Source of the current claim (None when idle)
    pub origin: Option<Origin>,
    /// When the current claim began
    pub active_since: Option<Instant>,
    /// Protocol the channel is pinned to
    pub fixed_mode: Option<Protocol>,
    /// Whether the hardware can transmit and receive at once
    pub duplex: bool,
}

impl ChannelState {
    pub fn new(duplex: bool) -> Self {
        Self {
            mode: ChannelMode::Idle,
            origin: None,
            active_since: None,
            fixed_mode: None,
            duplex,
        }
    }
}

/// Network endpoint pair for one protocol's gateway link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Local UDP address to bind
    pub local: SocketAddr,
    /// Gateway address to exchange frames with
    pub gateway: SocketAddr,
}

/// Per-protocol settings as they appear in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSettings {
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds the channel is held after the last RF activity
    #[serde(default = "default_hang_secs")]
    pub rf_hang_secs: u64,
    /// Seconds the channel is held after the last network activity
    #[serde(default = "default_hang_secs")]
    pub net_hang_secs: u64,
    #[serde(default)]
    pub network: Option<NetworkSettings>,
}

fn default_true() -> bool {
    true
}

fn default_hang_secs() -> u64 {
    10
}

impl ProtocolSettings {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            enabled: true,
            rf_hang_secs: default_hang_secs(),
            net_hang_secs: default_hang_secs(),
            network: None,
        }
    }
}

/// One protocol registered with the arbiter
pub struct ProtocolDescriptor {
    pub protocol: Protocol,
    pub enabled: bool,
    pub rf_hang: Duration,
    pub net_hang: Duration,
    pub controller: Box<dyn ProtocolController>,
    pub network: Option<Box<dyn NetworkAdapter>>,
    /// Talker ID table used for status messages
    pub lookup: Option<Arc<IdLookup>>,
}

impl ProtocolDescriptor {
    /// Create an enabled descriptor with no network and the default hang times
    pub fn new(protocol: Protocol, controller: Box<dyn ProtocolController>) -> Self {
        Self::from_settings(&ProtocolSettings::new(protocol), controller)
    }

    /// Create a descriptor from configuration
    pub fn from_settings(
        settings: &ProtocolSettings,
        controller: Box<dyn ProtocolController>,
    ) -> Self {
        Self {
            protocol: settings.protocol,
            enabled: settings.enabled,
            rf_hang: Duration::from_secs(settings.rf_hang_secs),
            net_hang: Duration::from_secs(settings.net_hang_secs),
            controller,
            network: None,
            lookup: None,
        }
    }

    pub fn with_hang(mut self, rf_hang: Duration, net_hang: Duration) -> Self {
        self.rf_hang = rf_hang;
        self.net_hang = net_hang;
        self
    }

    pub fn with_network(mut self, network: Box<dyn NetworkAdapter>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<IdLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for ProtocolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolDescriptor")
            .field("protocol", &self.protocol)
            .field("enabled", &self.enabled)
            .field("rf_hang", &self.rf_hang)
            .field("net_hang", &self.net_hang)
            .field("network", &self.network.is_some())
            .field("lookup", &self.lookup.as_ref().map(|l| l.len()))
            .finish()
    }
}
