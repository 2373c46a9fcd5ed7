//! Mode arbiter
//!
//! The arbiter owns the shared modem channel. Once per tick it polls the
//! modem and every enabled network, lets the first active protocol (in
//! registration order) claim an idle channel, services the owner, and
//! releases the channel when the owner's hang time or the overall mode
//! timeout runs out.
//!
//! Nothing outside the arbiter mutates channel state. Remote commands reach
//! it through [`Arbiter::set_mode`] and [`Arbiter::set_enabled`], which take
//! `&mut self` and therefore only ever run between ticks.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dvh_protocol::Protocol;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{ChannelIo, ModemAdapter};
use crate::error::{ArbiterError, ModemError};
use crate::events::{ArbiterEvent, EventSink};
use crate::marker::PresenceMarker;
use crate::state::{ChannelMode, ChannelState, Origin, ProtocolDescriptor};
use crate::timer::Timer;

/// Upper bound on modem frames read per protocol per tick
const MAX_FRAMES_PER_TICK: usize = 64;

/// Periodic CW identification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CwIdConfig {
    pub interval: Duration,
    pub callsign: String,
}

/// Arbiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Longest a mode may be held without qualifying traffic
    pub mode_timeout: Duration,
    /// Hardware can transmit while receiving; gates CW identification
    pub duplex: bool,
    /// CW identification, None to disable
    pub cw_id: Option<CwIdConfig>,
    /// Minimum interval between DMR key-downs
    pub dmr_tx_guard: Duration,
    /// Protocol the channel is pinned to
    pub fixed_mode: Option<Protocol>,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            mode_timeout: Duration::from_secs(180),
            duplex: true,
            cw_id: None,
            dmr_tx_guard: Duration::from_secs(1),
            fixed_mode: None,
        }
    }
}

/// A registered protocol and its hang timers
struct Slot {
    descriptor: ProtocolDescriptor,
    rf_hang: Timer,
    net_hang: Timer,
    /// A refused key-down still has to be granted before frames go out
    key_pending: bool,
}

/// Activity seen for one protocol during a tick
#[derive(Debug, Default)]
struct Activity {
    rf: bool,
    net: bool,
    rf_frames: Vec<Vec<u8>>,
}

/// The mode arbiter
pub struct Arbiter {
    config: ArbiterConfig,
    slots: Vec<Slot>,
    state: ChannelState,
    modem: Box<dyn ModemAdapter>,
    sink: Box<dyn EventSink>,
    marker: Box<dyn PresenceMarker>,
    mode_timer: Timer,
    cw_timer: Timer,
    tx_guard: Timer,
    talker: Option<u32>,
    /// Channel mode the modem has not accepted yet
    unsent_mode: Option<Option<Protocol>>,
    shut_down: bool,
}

impl Arbiter {
    /// Create an arbiter over the given protocols
    ///
    /// Registration order is claim priority. Under fixed mode the pinned
    /// protocol takes the channel immediately.
    pub fn new(
        config: ArbiterConfig,
        descriptors: Vec<ProtocolDescriptor>,
        modem: Box<dyn ModemAdapter>,
        sink: Box<dyn EventSink>,
        marker: Box<dyn PresenceMarker>,
    ) -> Result<Self, ArbiterError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.protocol) {
                return Err(ArbiterError::InvalidMode(format!(
                    "{} registered more than once",
                    descriptor.protocol
                )));
            }
        }

        if let Some(pinned) = config.fixed_mode {
            match descriptors.iter().find(|d| d.protocol == pinned) {
                None => return Err(ArbiterError::UnknownProtocol(pinned.name().to_string())),
                Some(d) if !d.enabled => return Err(ArbiterError::ProtocolDisabled(pinned)),
                Some(_) => {}
            }
        }

        let slots = descriptors
            .into_iter()
            .map(|descriptor| Slot {
                rf_hang: Timer::new(descriptor.rf_hang),
                net_hang: Timer::new(descriptor.net_hang),
                key_pending: false,
                descriptor,
            })
            .collect();

        let mut state = ChannelState::new(config.duplex);
        state.fixed_mode = config.fixed_mode;

        let mut arbiter = Self {
            mode_timer: Timer::new(config.mode_timeout),
            cw_timer: Timer::new(
                config
                    .cw_id
                    .as_ref()
                    .map(|cw| cw.interval)
                    .unwrap_or_default(),
            ),
            tx_guard: Timer::new(config.dmr_tx_guard),
            config,
            slots,
            state,
            modem,
            sink,
            marker,
            talker: None,
            unsent_mode: None,
            shut_down: false,
        };

        if let Some(pinned) = arbiter.config.fixed_mode {
            info!("Fixed mode: channel pinned to {}", pinned);
            let now = Instant::now();
            if let Err(e) =
                arbiter.switch_to(ChannelMode::Protocol(pinned), Some(Origin::External), now)
            {
                arbiter.clear_marker();
                return Err(e.into());
            }
        }

        Ok(arbiter)
    }

    /// Current channel state
    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn mode(&self) -> ChannelMode {
        self.state.mode
    }

    /// Whether a modem failure has stopped the arbiter
    pub fn is_halted(&self) -> bool {
        self.state.mode == ChannelMode::Error
    }

    /// Registered protocols in claim priority order
    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.slots.iter().map(|slot| slot.descriptor.protocol)
    }

    /// Whether a protocol is registered and enabled
    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.slot(protocol)
            .is_some_and(|idx| self.slots[idx].descriptor.enabled)
    }

    fn slot(&self, protocol: Protocol) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.descriptor.protocol == protocol)
    }

    /// Run one scheduling cycle
    pub fn tick(&mut self, now: Instant) {
        if self.shut_down || self.is_halted() {
            return;
        }

        let status = match self.modem.poll() {
            Ok(status) => status,
            Err(e) => {
                self.enter_error(format!("Modem unavailable: {}", e), now);
                return;
            }
        };
        if status.error {
            self.enter_error("Modem reported an error state".to_string(), now);
            return;
        }
        if let Some(mode) = self.unsent_mode.take() {
            if let Err(e) = self.send_channel_mode(mode) {
                self.modem_failed(e, now);
                return;
            }
        }

        // Enabled flags and fixed mode are read once per tick
        let enabled: Vec<bool> = self.slots.iter().map(|s| s.descriptor.enabled).collect();
        let fixed = self.state.fixed_mode;
        let mut activity = self.collect_activity(&enabled);

        let mode = self.state.mode;
        let owner = match mode {
            ChannelMode::Lockout | ChannelMode::Error => None,
            ChannelMode::Protocol(p) => self.slot(p),
            ChannelMode::Idle => {
                let claim = match fixed {
                    Some(pinned) => self.slot(pinned).map(|idx| (idx, Origin::External)),
                    None => activity.iter().enumerate().find_map(|(idx, a)| {
                        if a.rf {
                            Some((idx, Origin::Rf))
                        } else if a.net {
                            Some((idx, Origin::Net))
                        } else {
                            None
                        }
                    }),
                };

                match claim {
                    Some((idx, origin)) => {
                        let protocol = self.slots[idx].descriptor.protocol;
                        if let Err(e) =
                            self.switch_to(ChannelMode::Protocol(protocol), Some(origin), now)
                        {
                            self.modem_failed(e, now);
                            return;
                        }
                        Some(idx)
                    }
                    None => None,
                }
            }
        };

        for (idx, a) in activity.iter().enumerate() {
            if Some(idx) != owner && !a.rf_frames.is_empty() {
                debug!(
                    "Discarding {} {} frame(s), channel is {}",
                    a.rf_frames.len(),
                    self.slots[idx].descriptor.protocol,
                    self.state.mode
                );
            }
        }

        if let Some(idx) = owner {
            let protocol = self.slots[idx].descriptor.protocol;
            if !enabled[idx] {
                info!("{} disabled while active, releasing channel", protocol);
                if let Err(e) = self.switch_to(ChannelMode::Idle, None, now) {
                    self.modem_failed(e, now);
                    return;
                }
            } else {
                let current = std::mem::take(&mut activity[idx]);
                let had_activity = current.rf || current.net;

                if let Err(e) = self.service(idx, current, now) {
                    self.modem_failed(e, now);
                    return;
                }

                if fixed.is_none() && !had_activity && self.hang_expired(idx, now) {
                    info!(
                        "{} inactive for its hang time, releasing channel",
                        protocol
                    );
                    if let Err(e) = self.switch_to(ChannelMode::Idle, None, now) {
                        self.modem_failed(e, now);
                        return;
                    }
                }
            }
        }

        self.discard_network(owner);

        if let Err(e) = self.run_cw_id(now) {
            self.modem_failed(e, now);
        }
    }

    /// Force the channel into a mode
    ///
    /// With `fixed_override` the fixed mode is replaced by the requested
    /// protocol (or cleared for `Idle`/`Lockout`) instead of refusing.
    pub fn set_mode(
        &mut self,
        mode: ChannelMode,
        fixed_override: bool,
        now: Instant,
    ) -> Result<(), ArbiterError> {
        if self.shut_down {
            return Err(ArbiterError::Halted("arbiter has shut down".to_string()));
        }

        match mode {
            ChannelMode::Error => Err(ArbiterError::InvalidMode(
                "ERROR cannot be selected".to_string(),
            )),

            ChannelMode::Lockout => {
                if self.is_halted() {
                    return Err(ArbiterError::InvalidMode(format!(
                        "channel is in {}",
                        self.state.mode
                    )));
                }
                if fixed_override {
                    self.state.fixed_mode = None;
                }
                if self.state.mode == ChannelMode::Lockout {
                    return Ok(());
                }
                self.switch_external(ChannelMode::Lockout, now)
            }

            ChannelMode::Idle => {
                if fixed_override {
                    self.state.fixed_mode = None;
                }
                let target = match self.state.fixed_mode {
                    Some(pinned) => ChannelMode::Protocol(pinned),
                    None => ChannelMode::Idle,
                };
                if self.state.mode == target {
                    return Ok(());
                }
                self.switch_external(target, now)
            }

            ChannelMode::Protocol(protocol) => {
                let idx = self.slot(protocol).ok_or_else(|| {
                    ArbiterError::InvalidMode(format!("{} is not configured", protocol))
                })?;
                if !self.slots[idx].descriptor.enabled {
                    return Err(ArbiterError::ProtocolDisabled(protocol));
                }
                if matches!(self.state.mode, ChannelMode::Lockout | ChannelMode::Error) {
                    return Err(ArbiterError::InvalidMode(format!(
                        "channel is in {}",
                        self.state.mode
                    )));
                }
                if let Some(pinned) = self.state.fixed_mode {
                    if pinned != protocol && !fixed_override {
                        return Err(ArbiterError::FixedModeViolation {
                            pinned,
                            requested: protocol,
                        });
                    }
                }
                if fixed_override {
                    info!("Fixed mode: channel pinned to {}", protocol);
                    self.state.fixed_mode = Some(protocol);
                }

                if self.state.mode == mode {
                    self.state.origin = Some(Origin::External);
                    self.mode_timer.start(self.config.mode_timeout, now);
                    return Ok(());
                }
                self.switch_external(mode, now)
            }
        }
    }

    /// Enable or disable a protocol
    ///
    /// Disabling the owner releases the channel on the next tick.
    pub fn set_enabled(&mut self, protocol: Protocol, enabled: bool) -> Result<(), ArbiterError> {
        if self.shut_down {
            return Err(ArbiterError::Halted("arbiter has shut down".to_string()));
        }

        let idx = self
            .slot(protocol)
            .ok_or_else(|| ArbiterError::UnknownProtocol(protocol.name().to_string()))?;

        if !enabled && self.state.fixed_mode == Some(protocol) {
            return Err(ArbiterError::FixedModeViolation {
                pinned: protocol,
                requested: protocol,
            });
        }

        self.slots[idx].descriptor.enabled = enabled;
        self.sink
            .emit(ArbiterEvent::ProtocolEnabled { protocol, enabled });
        Ok(())
    }

    /// Ask to key the transmitter for a protocol
    ///
    /// DMR key-downs are refused while the TX guard from the previous one is
    /// still running.
    pub fn request_key_down(
        &mut self,
        protocol: Protocol,
        now: Instant,
    ) -> Result<(), ArbiterError> {
        if self.shut_down {
            return Err(ArbiterError::Halted("arbiter has shut down".to_string()));
        }
        if protocol != Protocol::Dmr || self.config.dmr_tx_guard.is_zero() {
            return Ok(());
        }

        if self.tx_guard.is_running() && !self.tx_guard.has_expired(now) {
            return Err(ArbiterError::TxGuardActive {
                remaining_ms: self.tx_guard.remaining(now).as_millis() as u64,
            });
        }

        self.tx_guard.start(self.config.dmr_tx_guard, now);
        Ok(())
    }

    /// Release the channel for good
    ///
    /// Clears the marker whatever the mode (fixed mode and error included).
    /// The arbiter ignores ticks and refuses commands afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        self.state.fixed_mode = None;
        if self.state.mode.is_idle() {
            self.clear_marker();
        } else if let Err(e) = self.switch_to(ChannelMode::Idle, None, Instant::now()) {
            warn!("Modem did not acknowledge idle during shutdown: {}", e);
        }

        self.shut_down = true;
        info!("Arbiter shut down");
    }

    fn collect_activity(&mut self, enabled: &[bool]) -> Vec<Activity> {
        let mut activity = Vec::with_capacity(self.slots.len());

        for (slot, &enabled) in self.slots.iter_mut().zip(enabled) {
            let protocol = slot.descriptor.protocol;

            let mut rf_frames = Vec::new();
            while rf_frames.len() < MAX_FRAMES_PER_TICK {
                match self.modem.read_frame(protocol) {
                    Some(frame) => rf_frames.push(frame),
                    None => break,
                }
            }

            if !enabled {
                if !rf_frames.is_empty() {
                    debug!(
                        "Discarding {} frame(s) for disabled {}",
                        rf_frames.len(),
                        protocol
                    );
                }
                activity.push(Activity::default());
                continue;
            }

            let rf = protocol.has_rf_receive()
                && (!rf_frames.is_empty() || slot.descriptor.controller.has_rf_activity());
            let net = slot
                .descriptor
                .network
                .as_mut()
                .is_some_and(|network| network.has_inbound_activity());

            activity.push(Activity { rf, net, rf_frames });
        }

        activity
    }

    fn service(&mut self, idx: usize, activity: Activity, now: Instant) -> Result<(), ModemError> {
        let protocol = self.slots[idx].descriptor.protocol;

        let net_frames = match self.slots[idx].descriptor.network.as_mut() {
            Some(network) => network.forward_to_channel(),
            None => Vec::new(),
        };

        let mut io = ChannelIo::new(protocol, now, &activity.rf_frames, &net_frames);
        let result = self.slots[idx].descriptor.controller.service(&mut io);
        let (to_modem, to_network) = io.into_outbound();

        // Frames stay withheld until a refused key-down has been granted
        let pending = self.slots[idx].key_pending;
        let mut transmit = true;
        if result.key_down || (pending && !to_modem.is_empty()) {
            match self.request_key_down(protocol, now) {
                Err(ArbiterError::TxGuardActive { remaining_ms }) => {
                    transmit = false;
                    self.slots[idx].key_pending = true;
                    if !pending {
                        self.sink.emit(ArbiterEvent::KeyDownRefused {
                            protocol,
                            remaining_ms,
                        });
                    }
                }
                _ => self.slots[idx].key_pending = false,
            }
        }

        if transmit {
            for (sent, frame) in to_modem.iter().enumerate() {
                match self.modem.write_frame(protocol, frame) {
                    Ok(()) => {}
                    Err(ModemError::QueueFull) => {
                        warn!(
                            "Modem queue full, dropping {} {} frame(s)",
                            to_modem.len() - sent,
                            protocol
                        );
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        } else if !to_modem.is_empty() {
            debug!(
                "Withholding {} {} frame(s) during TX guard",
                to_modem.len(),
                protocol
            );
        }

        match self.slots[idx].descriptor.network.as_mut() {
            Some(network) => {
                for frame in &to_network {
                    network.forward_from_channel(frame);
                }
            }
            None if !to_network.is_empty() => {
                trace!("{} has no network, dropping {} frame(s)", protocol, to_network.len());
            }
            None => {}
        }

        if result.produced_output {
            trace!(
                "{} produced {} modem / {} network frame(s)",
                protocol,
                to_modem.len(),
                to_network.len()
            );
        }

        let slot = &mut self.slots[idx];
        if activity.rf {
            slot.rf_hang.start(slot.descriptor.rf_hang, now);
        }
        if activity.net {
            slot.net_hang.start(slot.descriptor.net_hang, now);
        }
        if activity.rf || activity.net {
            self.state.origin = Some(if activity.rf { Origin::Rf } else { Origin::Net });
            self.mode_timer.reset(now);
        }

        self.report_talker(idx);
        Ok(())
    }

    fn hang_expired(&self, idx: usize, now: Instant) -> bool {
        let slot = &self.slots[idx];
        let hang = match self.state.origin {
            Some(Origin::Rf) => slot.rf_hang.has_expired(now),
            Some(Origin::Net) => slot.net_hang.has_expired(now),
            Some(Origin::External) | None => false,
        };
        hang || self.mode_timer.has_expired(now)
    }

    fn report_talker(&mut self, idx: usize) {
        let slot = &self.slots[idx];
        let Some(id) = slot.descriptor.controller.talker_id() else {
            return;
        };
        if self.talker == Some(id) {
            return;
        }

        let protocol = slot.descriptor.protocol;
        let text = match slot.descriptor.lookup.as_ref().and_then(|l| l.find(id)) {
            Some(callsign) => format!("{} talker {} ({})", protocol, id, callsign),
            None => format!("{} talker {}", protocol, id),
        };
        self.talker = Some(id);
        self.sink.emit(ArbiterEvent::Message(text));
    }

    fn discard_network(&mut self, owner: Option<usize>) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if Some(idx) == owner {
                continue;
            }
            if let Some(network) = slot.descriptor.network.as_mut() {
                let dropped = network.forward_to_channel();
                if !dropped.is_empty() {
                    debug!(
                        "Discarding {} {} network frame(s), channel is {}",
                        dropped.len(),
                        slot.descriptor.protocol,
                        self.state.mode
                    );
                }
            }
        }
    }

    fn run_cw_id(&mut self, now: Instant) -> Result<(), ModemError> {
        let Some(cw) = self.config.cw_id.as_ref() else {
            return Ok(());
        };

        // Only idle time counts towards the interval
        if !self.state.mode.is_idle() || !self.state.duplex {
            self.cw_timer.stop();
            return Ok(());
        }
        if !self.cw_timer.is_running() {
            self.cw_timer.start(cw.interval, now);
            return Ok(());
        }

        if self.cw_timer.has_expired(now) {
            let callsign = cw.callsign.clone();
            match self.modem.send_cw_id(&callsign) {
                Ok(()) => {}
                Err(ModemError::QueueFull) => {
                    warn!("Modem queue full, CW ID deferred");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            self.cw_timer.reset(now);
            self.sink.emit(ArbiterEvent::CwIdSent { callsign });
        }
        Ok(())
    }

    /// Move to a new mode, updating timers, marker, modem and events
    fn switch_to(
        &mut self,
        to: ChannelMode,
        origin: Option<Origin>,
        now: Instant,
    ) -> Result<(), ModemError> {
        let from = self.state.mode;
        if from == to {
            return Ok(());
        }

        if let Some(idx) = from.protocol().and_then(|p| self.slot(p)) {
            let slot = &mut self.slots[idx];
            slot.descriptor.controller.reset();
            slot.rf_hang.stop();
            slot.net_hang.stop();
            slot.key_pending = false;
            self.talker = None;
        }

        self.state.mode = to;
        self.state.origin = origin;
        self.state.active_since = if to.is_idle() { None } else { Some(now) };
        self.mode_timer.stop();

        match to {
            ChannelMode::Protocol(protocol) => {
                if let Some(idx) = self.slot(protocol) {
                    let slot = &mut self.slots[idx];
                    match origin {
                        Some(Origin::Rf) => slot.rf_hang.start(slot.descriptor.rf_hang, now),
                        Some(Origin::Net) => slot.net_hang.start(slot.descriptor.net_hang, now),
                        Some(Origin::External) | None => {}
                    }
                }
                self.mode_timer.start(self.config.mode_timeout, now);
                self.set_marker(protocol.name());
            }
            ChannelMode::Idle => self.clear_marker(),
            ChannelMode::Lockout | ChannelMode::Error => self.set_marker(to.label()),
        }

        match origin {
            Some(origin) => info!("Mode changed {} -> {} ({})", from, to, origin.as_str()),
            None => info!("Mode changed {} -> {}", from, to),
        }
        self.sink
            .emit(ArbiterEvent::ModeChanged { from, to, origin });

        if to != ChannelMode::Error && from.protocol() != to.protocol() {
            self.send_channel_mode(to.protocol())?;
        }
        Ok(())
    }

    /// Tell the modem the channel mode, retrying next tick if it is busy
    fn send_channel_mode(&mut self, protocol: Option<Protocol>) -> Result<(), ModemError> {
        match self.modem.set_channel_mode(protocol) {
            Ok(()) => {
                self.unsent_mode = None;
                Ok(())
            }
            Err(ModemError::QueueFull) => {
                warn!("Modem queue full, mode change deferred");
                self.unsent_mode = Some(protocol);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn switch_external(&mut self, to: ChannelMode, now: Instant) -> Result<(), ArbiterError> {
        let origin = if to.is_idle() {
            None
        } else {
            Some(Origin::External)
        };
        if let Err(e) = self.switch_to(to, origin, now) {
            self.modem_failed(e.clone(), now);
            return Err(e.into());
        }
        Ok(())
    }

    fn modem_failed(&mut self, err: ModemError, now: Instant) {
        self.enter_error(format!("Modem failure: {}", err), now);
    }

    /// Stop servicing everything until an operator intervenes
    fn enter_error(&mut self, reason: String, now: Instant) {
        if self.state.mode == ChannelMode::Error {
            return;
        }
        error!("{}", reason);
        self.sink.emit(ArbiterEvent::Message(reason));
        // Entering Error never talks to the modem, so this cannot fail
        let _ = self.switch_to(ChannelMode::Error, None, now);
    }

    fn set_marker(&mut self, label: &str) {
        if let Err(e) = self.marker.set(label) {
            warn!("Failed to set lock marker ({}): {}", label, e);
            self.sink
                .emit(ArbiterEvent::Message(format!("Lock marker error: {}", e)));
        }
    }

    fn clear_marker(&mut self) {
        if let Err(e) = self.marker.clear() {
            warn!("Failed to clear lock marker: {}", e);
            self.sink
                .emit(ArbiterEvent::Message(format!("Lock marker error: {}", e)));
        }
    }
}
