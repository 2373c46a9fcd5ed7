//! Host configuration
//!
//! A JSON document, read from `--config` or from the XDG location
//! (`$XDG_CONFIG_HOME/dvhost/config.json`, falling back to
//! `~/.config/dvhost/config.json`). Every field has a default, so a missing
//! file or a partial document is fine.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dvh_mux::{ArbiterConfig, CwIdConfig, ProtocolSettings};
use dvh_protocol::Protocol;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("protocol {0} is listed more than once")]
    DuplicateProtocol(Protocol),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("fixed mode {0} is not in the protocol list")]
    FixedModeNotListed(Protocol),

    #[error("fixed mode {0} is disabled")]
    FixedModeDisabled(Protocol),

    #[error("tick_ms must be greater than zero")]
    InvalidTick,
}

/// General station settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneralConfig {
    pub callsign: String,
    /// Hardware can transmit while receiving
    pub duplex: bool,
    /// Longest a mode may be held without traffic
    pub timeout_secs: u64,
    /// Scheduling period
    pub tick_ms: u64,
    /// Protocol to pin the channel to
    pub fixed_mode: Option<String>,
    /// Lock file mirroring the channel owner
    pub lock_file: Option<PathBuf>,
    /// Tracing filter used when RUST_LOG is unset
    pub log_level: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            duplex: true,
            timeout_secs: 180,
            tick_ms: 10,
            fixed_mode: None,
            lock_file: None,
            log_level: None,
        }
    }
}

/// Periodic CW identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CwIdSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Overrides the general callsign
    pub callsign: Option<String>,
}

impl Default for CwIdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 600,
            callsign: None,
        }
    }
}

/// How the modem is reached
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModemTransport {
    #[default]
    Serial,
    Udp,
}

/// Modem connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModemConfig {
    pub transport: ModemTransport,
    /// Serial device
    pub port: String,
    pub baud_rate: u32,
    /// Modem address for the UDP transport
    pub address: SocketAddr,
    /// Local UDP address, port 0 for any
    pub local: SocketAddr,
    /// Use the simulated modem instead of real hardware
    pub simulate: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            transport: ModemTransport::Serial,
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 115_200,
            address: SocketAddr::from(([127, 0, 0, 1], 3334)),
            local: SocketAddr::from(([0, 0, 0, 0], 0)),
            simulate: false,
        }
    }
}

/// Remote control TCP port
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::from(([127, 0, 0, 1], 7642)),
        }
    }
}

/// Talker ID tables
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LookupConfig {
    pub dmr_ids: Option<PathBuf>,
    pub nxdn_ids: Option<PathBuf>,
}

/// The whole host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub general: GeneralConfig,
    pub cw_id: CwIdSettings,
    pub dmr_tx_guard_ms: u64,
    pub modem: ModemConfig,
    pub remote: RemoteConfig,
    pub lookups: LookupConfig,
    /// Protocols in claim priority order
    pub protocols: Vec<ProtocolSettings>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cw_id: CwIdSettings::default(),
            dmr_tx_guard_ms: 1000,
            modem: ModemConfig::default(),
            remote: RemoteConfig::default(),
            lookups: LookupConfig::default(),
            protocols: [Protocol::DStar, Protocol::Dmr, Protocol::Ysf]
                .into_iter()
                .map(ProtocolSettings::new)
                .collect(),
        }
    }
}

impl HostConfig {
    /// Get the XDG config directory for dvhost
    /// Uses $XDG_CONFIG_HOME/dvhost, falls back to ~/.config/dvhost
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("dvhost"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("dvhost"))
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load from an explicit path or the default location
    ///
    /// An explicit path must exist. Without one, a missing default file
    /// yields the defaults. Returns the path that was read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok((Self::default(), None)),
            },
        };

        let config = Self::load_from_file(&path)?;
        Ok((config, Some(path)))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the settings that would otherwise fail at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.tick_ms == 0 {
            return Err(ConfigError::InvalidTick);
        }

        let mut seen = HashSet::new();
        for settings in &self.protocols {
            if !seen.insert(settings.protocol) {
                return Err(ConfigError::DuplicateProtocol(settings.protocol));
            }
        }

        self.fixed_mode().map(|_| ())
    }

    /// The pinned protocol, checked against the protocol list
    pub fn fixed_mode(&self) -> Result<Option<Protocol>, ConfigError> {
        let Some(name) = self.general.fixed_mode.as_deref() else {
            return Ok(None);
        };
        let protocol: Protocol = name
            .parse()
            .map_err(|_| ConfigError::UnknownProtocol(name.to_string()))?;

        match self.protocols.iter().find(|s| s.protocol == protocol) {
            None => Err(ConfigError::FixedModeNotListed(protocol)),
            Some(s) if !s.enabled => Err(ConfigError::FixedModeDisabled(protocol)),
            Some(_) => Ok(Some(protocol)),
        }
    }

    pub fn arbiter_config(&self) -> Result<ArbiterConfig, ConfigError> {
        let callsign = self
            .cw_id
            .callsign
            .clone()
            .unwrap_or_else(|| self.general.callsign.clone());

        let cw_id = (self.cw_id.enabled && !callsign.is_empty()).then(|| CwIdConfig {
            interval: Duration::from_secs(self.cw_id.interval_secs),
            callsign,
        });

        Ok(ArbiterConfig {
            mode_timeout: Duration::from_secs(self.general.timeout_secs),
            duplex: self.general.duplex,
            cw_id,
            dmr_tx_guard: Duration::from_millis(self.dmr_tx_guard_ms),
            fixed_mode: self.fixed_mode()?,
        })
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.general.tick_ms)
    }

    /// Tracing filter for when RUST_LOG is not set
    pub fn log_filter(&self) -> String {
        self.general.log_level.clone().unwrap_or_else(|| {
            "dvhost=info,dvh_protocol=info,dvh_mux=info,dvh_sim=info".to_string()
        })
    }
}
