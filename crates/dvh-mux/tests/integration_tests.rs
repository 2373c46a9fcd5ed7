//! Integration tests for the mode arbiter
//!
//! These tests drive the arbiter through the simulated collaborators and
//! check end-to-end behavior:
//! - Claiming an idle channel and releasing it on hang or mode timeout
//! - Fixed mode, lockout and error handling
//! - Remote control replies
//! - DMR transmit guard and CW identification
//! - The stock frame relay and async modem behind the arbiter
//! - Channel invariants under random activity

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dvh_mux::{
    Arbiter, ArbiterConfig, ArbiterError, ArbiterEvent, AsyncModem, ChannelMode, CwIdConfig,
    FrameRelay, IdLookup, ModemAdapter, Origin, ProtocolDescriptor, RemoteControl,
};
use dvh_protocol::frame::{default_tx_type, DMR_DATA1};
use dvh_protocol::{ModemStatusFlags, Protocol};
use dvh_sim::{
    RecordingMarker, RecordingMarkerHandle, ScriptedController, ScriptedControllerHandle,
    SimModem, SimModemHandle, SimNetwork, SimNetworkHandle,
};
use tokio::sync::mpsc;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// One protocol to register with a test arbiter
    pub struct Entry {
        pub protocol: Protocol,
        pub enabled: bool,
        pub rf_hang_secs: u64,
        pub net_hang_secs: u64,
        pub lookup: Option<Arc<IdLookup>>,
    }

    pub fn entry(protocol: Protocol) -> Entry {
        Entry {
            protocol,
            enabled: true,
            rf_hang_secs: 10,
            net_hang_secs: 10,
            lookup: None,
        }
    }

    impl Entry {
        pub fn hang(mut self, rf_secs: u64, net_secs: u64) -> Self {
            self.rf_hang_secs = rf_secs;
            self.net_hang_secs = net_secs;
            self
        }

        pub fn disabled(mut self) -> Self {
            self.enabled = false;
            self
        }

        pub fn lookup(mut self, lookup: IdLookup) -> Self {
            self.lookup = Some(Arc::new(lookup));
            self
        }
    }

    /// An arbiter wired to simulated collaborators
    pub struct Rig {
        pub arbiter: Arbiter,
        pub modem: SimModemHandle,
        pub marker: RecordingMarkerHandle,
        pub events: mpsc::Receiver<ArbiterEvent>,
        pub controllers: HashMap<Protocol, ScriptedControllerHandle>,
        pub networks: HashMap<Protocol, SimNetworkHandle>,
        pub t0: Instant,
    }

    pub fn try_rig(config: ArbiterConfig, entries: Vec<Entry>) -> Result<Rig, ArbiterError> {
        let t0 = Instant::now();
        let modem = SimModem::new();
        let marker = RecordingMarker::new();
        let (tx, events) = mpsc::channel(4096);

        let mut controllers = HashMap::new();
        let mut networks = HashMap::new();
        let mut descriptors = Vec::new();

        for entry in entries {
            let controller = ScriptedController::new();
            let network = SimNetwork::new();
            controllers.insert(entry.protocol, controller.handle());
            networks.insert(entry.protocol, network.handle());

            let mut descriptor = ProtocolDescriptor::new(entry.protocol, Box::new(controller))
                .with_hang(
                    Duration::from_secs(entry.rf_hang_secs),
                    Duration::from_secs(entry.net_hang_secs),
                )
                .with_network(Box::new(network));
            if !entry.enabled {
                descriptor = descriptor.disabled();
            }
            if let Some(lookup) = entry.lookup {
                descriptor = descriptor.with_lookup(lookup);
            }
            descriptors.push(descriptor);
        }

        let modem_handle = modem.handle();
        let marker_handle = marker.handle();
        let arbiter = Arbiter::new(
            config,
            descriptors,
            Box::new(modem),
            Box::new(tx),
            Box::new(marker),
        )?;

        Ok(Rig {
            arbiter,
            modem: modem_handle,
            marker: marker_handle,
            events,
            controllers,
            networks,
            t0,
        })
    }

    pub fn rig(config: ArbiterConfig, entries: Vec<Entry>) -> Rig {
        try_rig(config, entries).unwrap()
    }

    impl Rig {
        pub fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        pub fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            self.arbiter.tick(now);
        }

        /// Receive one frame over the air for a protocol
        pub fn rf(&self, protocol: Protocol) {
            self.modem
                .inject_rf(protocol, vec![default_tx_type(protocol), 0x01, 0x02]);
        }

        /// Receive one frame from a protocol's network
        pub fn net(&self, protocol: Protocol) {
            self.networks[&protocol].inject(vec![default_tx_type(protocol), 0x03, 0x04]);
        }

        pub fn remote(&mut self, line: &str, ms: u64) -> String {
            let now = self.at(ms);
            RemoteControl::handle_line(&mut self.arbiter, line, now)
        }

        pub fn controller(&self, protocol: Protocol) -> &ScriptedControllerHandle {
            &self.controllers[&protocol]
        }

        pub fn drain_events(&mut self) -> Vec<ArbiterEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }

        /// Modes entered since the last drain, in order
        pub fn mode_changes(&mut self) -> Vec<ChannelMode> {
            self.drain_events()
                .iter()
                .filter_map(ArbiterEvent::new_mode)
                .collect()
        }

        pub fn mode(&self) -> ChannelMode {
            self.arbiter.mode()
        }
    }

    pub fn has_message(events: &[ArbiterEvent], needle: &str) -> bool {
        events
            .iter()
            .any(|e| matches!(e, ArbiterEvent::Message(text) if text.contains(needle)))
    }
}

use helpers::{entry, rig, Rig};

// ============================================================================
// Scenario Tests
// ============================================================================

mod scenario_tests {
    use super::*;

    #[test]
    fn test_dmr_rf_claim_and_hang_release() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::Dmr).hang(6, 6)],
        );

        r.rf(Protocol::Dmr);
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Dmr));
        assert_eq!(r.arbiter.state().origin, Some(Origin::Rf));
        assert_eq!(r.arbiter.state().active_since, Some(r.at(0)));
        assert_eq!(r.marker.current().as_deref(), Some("DMR"));

        for second in 1..=5 {
            r.tick(second * 1000);
            assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Dmr));
        }

        r.tick(7000);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert!(!r.marker.is_present());
        assert_eq!(
            r.mode_changes(),
            vec![ChannelMode::Protocol(Protocol::Dmr), ChannelMode::Idle]
        );
    }

    #[test]
    fn test_fixed_mode_ignores_other_protocols() {
        let config = ArbiterConfig {
            fixed_mode: Some(Protocol::Ysf),
            ..Default::default()
        };
        let mut r = rig(config, vec![entry(Protocol::Ysf), entry(Protocol::Nxdn)]);

        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Ysf));
        assert_eq!(r.arbiter.state().origin, Some(Origin::External));
        assert_eq!(r.marker.current().as_deref(), Some("YSF"));

        let mut ticks = 0;
        for second in (0..=400).step_by(10) {
            r.rf(Protocol::Nxdn);
            r.net(Protocol::Nxdn);
            r.tick(second * 1000);
            ticks += 1;
            assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Ysf));
        }

        assert_eq!(r.controller(Protocol::Nxdn).services(), 0);
        assert_eq!(r.controller(Protocol::Ysf).services(), ticks);
        assert_eq!(r.modem.pending_rf(Protocol::Nxdn), 0);
        assert_eq!(r.networks[&Protocol::Nxdn].pending(), 0);
        assert_eq!(r.mode_changes(), vec![ChannelMode::Protocol(Protocol::Ysf)]);
    }

    #[test]
    fn test_remote_mode_dstar() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::DStar), entry(Protocol::Dmr)],
        );

        assert_eq!(r.remote("mode dstar", 0), "OK mode D-Star");
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::DStar));
        assert_eq!(r.arbiter.state().origin, Some(Origin::External));
        assert_eq!(r.marker.current().as_deref(), Some("D-Star"));
        assert_eq!(r.modem.last_mode(), Some(Protocol::DStar));

        assert_eq!(r.remote("mode idle", 10), "OK mode IDLE");
        assert_eq!(r.remote("disable dstar", 20), "OK dstar disabled");

        let reply = r.remote("mode dstar", 30);
        assert!(reply.starts_with("ERR INVALID_MODE"), "{}", reply);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert!(!r.marker.is_present());
    }

    #[test]
    fn test_dmr_tx_guard() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Dmr)]);
        r.arbiter
            .set_mode(ChannelMode::Protocol(Protocol::Dmr), false, r.at(0))
            .unwrap();

        assert_eq!(r.arbiter.request_key_down(Protocol::Dmr, r.at(0)), Ok(()));
        assert_eq!(
            r.arbiter.request_key_down(Protocol::Dmr, r.at(400)),
            Err(ArbiterError::TxGuardActive { remaining_ms: 600 })
        );
        assert_eq!(r.arbiter.request_key_down(Protocol::Dmr, r.at(1000)), Ok(()));

        // Other protocols are never guarded
        assert_eq!(r.arbiter.request_key_down(Protocol::Ysf, r.at(1001)), Ok(()));
    }

    #[test]
    fn test_dmr_tx_guard_withholds_network_frames() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Dmr)]);
        r.controller(Protocol::Dmr).set_key_down(true);

        r.net(Protocol::Dmr);
        r.tick(0);
        assert_eq!(r.arbiter.state().origin, Some(Origin::Net));
        assert_eq!(r.modem.written().len(), 1);

        r.net(Protocol::Dmr);
        r.tick(200);
        assert_eq!(r.modem.written().len(), 1);
        let events = r.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ArbiterEvent::KeyDownRefused {
                protocol: Protocol::Dmr,
                remaining_ms: 800
            }
        )));

        r.net(Protocol::Dmr);
        r.tick(1200);
        assert_eq!(r.modem.written().len(), 2);
    }

    #[test]
    fn test_disabling_active_protocol_releases_next_tick() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::P25).hang(10, 10)],
        );

        r.rf(Protocol::P25);
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::P25));

        r.arbiter.set_enabled(Protocol::P25, false).unwrap();
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::P25));

        r.tick(100);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert!(!r.marker.is_present());

        r.rf(Protocol::P25);
        r.tick(200);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert_eq!(r.controller(Protocol::P25).services(), 1);
    }
}

// ============================================================================
// Arbitration Tests
// ============================================================================

mod arbitration_tests {
    use super::*;

    #[test]
    fn test_net_activity_uses_net_hang() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::Ysf).hang(2, 5)],
        );

        r.net(Protocol::Ysf);
        r.tick(0);
        assert_eq!(r.arbiter.state().origin, Some(Origin::Net));
        assert_eq!(r.modem.written().len(), 1);

        r.tick(3000);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Ysf));

        r.tick(5000);
        assert_eq!(r.mode(), ChannelMode::Idle);
    }

    #[test]
    fn test_rf_wins_over_net_in_same_tick() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Dmr)]);

        r.rf(Protocol::Dmr);
        r.net(Protocol::Dmr);
        r.tick(0);
        assert_eq!(r.arbiter.state().origin, Some(Origin::Rf));
    }

    #[test]
    fn test_controller_activity_keeps_channel() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::M17).hang(1, 1)],
        );

        r.controller(Protocol::M17).set_rf_active(true);
        for second in 0..20 {
            r.tick(second * 1000);
            assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::M17));
        }

        r.controller(Protocol::M17).set_rf_active(false);
        r.tick(21_000);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert_eq!(r.controller(Protocol::M17).resets(), 1);
    }

    #[test]
    fn test_owner_traffic_routed_and_others_dropped() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::Dmr), entry(Protocol::Ysf)],
        );

        r.rf(Protocol::Dmr);
        r.tick(0);

        r.rf(Protocol::Dmr);
        r.rf(Protocol::Ysf);
        r.net(Protocol::Ysf);
        r.tick(100);

        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Dmr));
        assert_eq!(r.controller(Protocol::Dmr).rf_seen().len(), 2);
        assert_eq!(r.networks[&Protocol::Dmr].forwarded().len(), 2);

        assert_eq!(r.controller(Protocol::Ysf).services(), 0);
        assert_eq!(r.modem.pending_rf(Protocol::Ysf), 0);
        assert_eq!(r.networks[&Protocol::Ysf].pending(), 0);
    }

    #[test]
    fn test_disabled_network_backlog_is_discarded() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Ysf)]);
        r.arbiter.set_enabled(Protocol::Ysf, false).unwrap();

        for _ in 0..3 {
            r.net(Protocol::Ysf);
        }
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert_eq!(r.networks[&Protocol::Ysf].pending(), 0);

        r.arbiter.set_enabled(Protocol::Ysf, true).unwrap();
        r.tick(100);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert_eq!(r.controller(Protocol::Ysf).services(), 0);
    }

    #[test]
    fn test_pocsag_never_claims_from_rf() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Pocsag)]);

        r.rf(Protocol::Pocsag);
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Idle);

        r.net(Protocol::Pocsag);
        r.tick(100);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Pocsag));
    }

    #[test]
    fn test_mode_timeout_bounds_external_claim() {
        let config = ArbiterConfig {
            mode_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let mut r = rig(config, vec![entry(Protocol::DStar)]);

        assert_eq!(r.remote("mode dstar", 0), "OK mode D-Star");
        r.tick(29_000);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::DStar));

        r.tick(30_000);
        assert_eq!(r.mode(), ChannelMode::Idle);
    }

    #[test]
    fn test_lockout_refuses_claims() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Dmr)]);

        assert_eq!(r.remote("mode lockout", 0), "OK mode LOCKOUT");
        assert_eq!(r.marker.current().as_deref(), Some("LOCKOUT"));

        r.rf(Protocol::Dmr);
        r.net(Protocol::Dmr);
        r.tick(10);
        assert_eq!(r.mode(), ChannelMode::Lockout);
        assert_eq!(r.controller(Protocol::Dmr).services(), 0);

        assert!(r.remote("mode dmr", 20).starts_with("ERR INVALID_MODE"));
        assert_eq!(r.remote("mode idle", 30), "OK mode IDLE");
        assert!(!r.marker.is_present());
    }

    #[test]
    fn test_talker_reported_with_callsign() {
        let lookup = IdLookup::from_entries([(3100001, "N0CALL")]);
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::Dmr).lookup(lookup)],
        );

        r.controller(Protocol::Dmr).set_talker(Some(3100001));
        r.rf(Protocol::Dmr);
        r.tick(0);
        r.rf(Protocol::Dmr);
        r.tick(60);

        let talkers: Vec<_> = r
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, ArbiterEvent::Message(text) if text.contains("talker")))
            .collect();
        assert_eq!(
            talkers,
            vec![ArbiterEvent::Message("DMR talker 3100001 (N0CALL)".into())]
        );
    }

    #[test]
    fn test_construction_rejects_bad_fixed_mode() {
        let missing = ArbiterConfig {
            fixed_mode: Some(Protocol::Nxdn),
            ..Default::default()
        };
        assert!(matches!(
            helpers::try_rig(missing, vec![entry(Protocol::Dmr)]),
            Err(ArbiterError::UnknownProtocol(_))
        ));

        let disabled = ArbiterConfig {
            fixed_mode: Some(Protocol::Dmr),
            ..Default::default()
        };
        assert!(matches!(
            helpers::try_rig(disabled, vec![entry(Protocol::Dmr).disabled()]),
            Err(ArbiterError::ProtocolDisabled(Protocol::Dmr))
        ));

        assert!(matches!(
            helpers::try_rig(
                ArbiterConfig::default(),
                vec![entry(Protocol::Dmr), entry(Protocol::Dmr)]
            ),
            Err(ArbiterError::InvalidMode(_))
        ));
    }
}

// ============================================================================
// Error Handling Tests
// ============================================================================

mod error_tests {
    use super::*;

    #[test]
    fn test_modem_failure_enters_error() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Dmr)]);

        r.rf(Protocol::Dmr);
        r.tick(0);
        r.drain_events();

        r.modem.set_failed(true);
        r.tick(100);
        assert_eq!(r.mode(), ChannelMode::Error);
        assert!(r.arbiter.is_halted());
        assert_eq!(r.marker.current().as_deref(), Some("ERROR"));
        assert!(helpers::has_message(&r.drain_events(), "Modem unavailable"));

        r.modem.set_failed(false);
        r.rf(Protocol::Dmr);
        r.tick(200);
        assert_eq!(r.mode(), ChannelMode::Error);
        assert!(r.remote("mode dmr", 300).starts_with("ERR INVALID_MODE"));

        r.arbiter.shutdown();
        assert!(!r.marker.is_present());
    }

    #[test]
    fn test_status_error_flag_enters_error() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Ysf)]);

        r.modem.set_status(ModemStatusFlags {
            error: true,
            ..Default::default()
        });
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Error);
    }

    #[test]
    fn test_marker_failure_is_reported_not_fatal() {
        let mut r = rig(ArbiterConfig::default(), vec![entry(Protocol::Nxdn)]);
        r.marker.set_failing(true);

        r.rf(Protocol::Nxdn);
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Nxdn));
        assert!(helpers::has_message(&r.drain_events(), "Lock marker error"));
    }

    #[test]
    fn test_shutdown_clears_fixed_mode_marker() {
        let config = ArbiterConfig {
            fixed_mode: Some(Protocol::Dmr),
            ..Default::default()
        };
        let mut r = rig(config, vec![entry(Protocol::Dmr)]);
        assert!(r.marker.is_present());

        r.arbiter.shutdown();
        assert!(!r.marker.is_present());
        assert_eq!(r.modem.last_mode(), None);

        r.rf(Protocol::Dmr);
        r.tick(0);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert!(matches!(
            r.arbiter.set_enabled(Protocol::Dmr, true),
            Err(ArbiterError::Halted(_))
        ));
    }
}

// ============================================================================
// Determinism and CW Identification Tests
// ============================================================================

mod ordering_tests {
    use super::*;

    fn first_claim(order: [Protocol; 2]) -> ChannelMode {
        let mut r = rig(
            ArbiterConfig::default(),
            order.iter().map(|p| entry(*p)).collect(),
        );
        r.rf(Protocol::Ysf);
        r.rf(Protocol::Dmr);
        r.tick(0);
        r.mode()
    }

    #[test]
    fn test_earlier_registration_wins() {
        assert_eq!(
            first_claim([Protocol::Ysf, Protocol::Dmr]),
            ChannelMode::Protocol(Protocol::Ysf)
        );
        assert_eq!(
            first_claim([Protocol::Dmr, Protocol::Ysf]),
            ChannelMode::Protocol(Protocol::Dmr)
        );
    }

    #[test]
    fn test_rf_claim_beats_later_net_claim() {
        let mut r = rig(
            ArbiterConfig::default(),
            vec![entry(Protocol::Dmr), entry(Protocol::Ysf)],
        );
        r.net(Protocol::Dmr);
        r.rf(Protocol::Ysf);
        r.tick(0);
        // Registration order decides across protocols, not the origin
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Dmr));
        assert_eq!(r.arbiter.state().origin, Some(Origin::Net));
    }
}

mod cw_id_tests {
    use super::*;

    fn cw_config(duplex: bool) -> ArbiterConfig {
        ArbiterConfig {
            duplex,
            cw_id: Some(CwIdConfig {
                interval: Duration::from_secs(60),
                callsign: "N0CALL".to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_exactly_one_id_per_interval() {
        let mut r = rig(cw_config(true), vec![entry(Protocol::Dmr)]);

        for second in 0..60 {
            r.tick(second * 1000);
        }
        assert!(r.modem.cw_ids().is_empty());

        r.tick(60_000);
        assert_eq!(r.modem.cw_ids(), vec!["N0CALL".to_string()]);
        assert_eq!(r.mode(), ChannelMode::Idle);

        for second in 61..120 {
            r.tick(second * 1000);
        }
        assert_eq!(r.modem.cw_ids().len(), 1);

        r.tick(120_000);
        assert_eq!(r.modem.cw_ids().len(), 2);
        assert!(r
            .drain_events()
            .iter()
            .all(|e| !e.is_mode_change()));
    }

    #[test]
    fn test_busy_time_does_not_count_towards_id() {
        let config = ArbiterConfig {
            cw_id: Some(CwIdConfig {
                interval: Duration::from_secs(600),
                callsign: "N0CALL".to_string(),
            }),
            ..Default::default()
        };
        let mut r = rig(config, vec![entry(Protocol::P25).hang(6, 6)]);

        r.tick(0);
        r.tick(10_000);
        r.controller(Protocol::P25).set_rf_active(true);
        for second in (11..=700).step_by(50) {
            r.tick(second * 1000);
            assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::P25));
        }

        r.controller(Protocol::P25).set_rf_active(false);
        r.tick(706_000);
        assert_eq!(r.mode(), ChannelMode::Idle);
        assert!(r.modem.cw_ids().is_empty());

        r.tick(1_305_000);
        assert!(r.modem.cw_ids().is_empty());
        r.tick(1_306_000);
        assert_eq!(r.modem.cw_ids(), vec!["N0CALL".to_string()]);
    }

    #[test]
    fn test_no_id_while_active_or_simplex() {
        let mut r = rig(cw_config(true), vec![entry(Protocol::Dmr).hang(600, 600)]);
        r.tick(0);
        r.rf(Protocol::Dmr);
        r.tick(1000);
        r.tick(90_000);
        assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Dmr));
        assert!(r.modem.cw_ids().is_empty());

        let mut simplex = rig(cw_config(false), vec![entry(Protocol::Dmr)]);
        simplex.tick(0);
        simplex.tick(90_000);
        assert!(simplex.modem.cw_ids().is_empty());
    }
}

// ============================================================================
// Stock Collaborator Tests
// ============================================================================

mod relay_tests {
    use super::*;

    type RelayRig = (Arbiter, SimNetworkHandle, mpsc::Receiver<ArbiterEvent>);

    /// DMR served by the stock relay, fed from a simulated network
    fn dmr_relay(modem: Box<dyn ModemAdapter>) -> RelayRig {
        let network = SimNetwork::new();
        let network_handle = network.handle();
        let (tx, events) = mpsc::channel(256);
        let relay = FrameRelay::new(Protocol::Dmr);
        let descriptor = ProtocolDescriptor::new(Protocol::Dmr, Box::new(relay))
            .with_network(Box::new(network));
        let arbiter = Arbiter::new(
            ArbiterConfig::default(),
            vec![descriptor],
            modem,
            Box::new(tx),
            Box::new(RecordingMarker::new()),
        )
        .unwrap();
        (arbiter, network_handle, events)
    }

    #[test]
    fn test_relay_cannot_transmit_inside_tx_guard() {
        let modem = SimModem::new();
        let written = modem.handle();
        let (mut arbiter, network, mut events) = dmr_relay(Box::new(modem));
        let t0 = Instant::now();
        let at = |ms: u64| t0 + Duration::from_millis(ms);

        network.inject(vec![DMR_DATA1, 0x01]);
        arbiter.tick(at(0));
        assert_eq!(arbiter.mode(), ChannelMode::Protocol(Protocol::Dmr));

        // Gap ends the first transmission, the next one keys too early
        arbiter.tick(at(600));
        network.inject(vec![DMR_DATA1, 0x02]);
        arbiter.tick(at(700));
        network.inject(vec![DMR_DATA1, 0x03]);
        arbiter.tick(at(710));
        assert_eq!(written.written(), vec![(Protocol::Dmr, vec![DMR_DATA1, 0x01])]);

        let mut refusals = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ArbiterEvent::KeyDownRefused { .. }) {
                refusals += 1;
            }
        }
        assert_eq!(refusals, 1);

        network.inject(vec![DMR_DATA1, 0x04]);
        arbiter.tick(at(1000));
        assert_eq!(
            written.written().last(),
            Some(&(Protocol::Dmr, vec![DMR_DATA1, 0x04]))
        );
    }

    #[tokio::test]
    async fn test_full_modem_queue_keeps_channel() {
        // The device side never reads, so the modem queue fills up
        let (host, _device) = tokio::io::duplex(64);
        let modem = AsyncModem::from_io("test".into(), host);
        let (mut arbiter, network, _events) = dmr_relay(Box::new(modem));

        for n in 0..300u16 {
            network.inject(vec![DMR_DATA1, n as u8]);
        }
        arbiter.tick(Instant::now());

        assert!(!arbiter.is_halted());
        assert_eq!(arbiter.mode(), ChannelMode::Protocol(Protocol::Dmr));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    const PROTOCOLS: [Protocol; 3] = [Protocol::DStar, Protocol::Dmr, Protocol::Ysf];

    #[derive(Debug, Clone)]
    enum Step {
        Quiet,
        Rf(usize),
        Net(usize),
        Enable(usize, bool),
        RemoteMode(usize),
        RemoteIdle,
        RemoteLockout,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => Just(Step::Quiet),
            4 => (0..3usize).prop_map(Step::Rf),
            3 => (0..3usize).prop_map(Step::Net),
            1 => (0..3usize, any::<bool>()).prop_map(|(i, e)| Step::Enable(i, e)),
            1 => (0..3usize).prop_map(Step::RemoteMode),
            1 => Just(Step::RemoteIdle),
            1 => Just(Step::RemoteLockout),
        ]
    }

    fn apply(r: &mut Rig, step: &Step, ms: u64) {
        match *step {
            Step::Quiet => {}
            Step::Rf(i) => r.rf(PROTOCOLS[i]),
            Step::Net(i) => r.net(PROTOCOLS[i]),
            Step::Enable(i, enabled) => {
                let _ = r.arbiter.set_enabled(PROTOCOLS[i], enabled);
            }
            Step::RemoteMode(i) => {
                let line = format!("mode {}", PROTOCOLS[i].keyword());
                r.remote(&line, ms);
            }
            Step::RemoteIdle => {
                r.remote("mode idle", ms);
            }
            Step::RemoteLockout => {
                r.remote("mode lockout", ms);
            }
        }
    }

    fn services(r: &Rig) -> Vec<usize> {
        PROTOCOLS
            .iter()
            .map(|p| r.controller(*p).services())
            .collect()
    }

    fn protocols() -> Vec<helpers::Entry> {
        PROTOCOLS.iter().map(|p| entry(*p).hang(2, 3)).collect()
    }

    proptest! {
        #[test]
        fn marker_present_iff_not_idle(steps in prop::collection::vec(step(), 1..80)) {
            let mut r = rig(ArbiterConfig::default(), protocols());
            for (n, step) in steps.iter().enumerate() {
                let ms = n as u64 * 500;
                apply(&mut r, step, ms);
                r.tick(ms);
                prop_assert_eq!(r.marker.is_present(), !r.mode().is_idle());
                r.drain_events();
            }
        }

        #[test]
        fn only_enabled_owner_is_serviced(steps in prop::collection::vec(step(), 1..80)) {
            let mut r = rig(ArbiterConfig::default(), protocols());
            for (n, step) in steps.iter().enumerate() {
                let ms = n as u64 * 500;
                apply(&mut r, step, ms);

                let before_mode = r.mode();
                let before = services(&r);
                let enabled: Vec<bool> =
                    PROTOCOLS.iter().map(|p| r.arbiter.is_enabled(*p)).collect();

                r.tick(ms);

                let after_mode = r.mode();
                if let ChannelMode::Protocol(p) = after_mode {
                    prop_assert!(r.arbiter.is_enabled(p));
                }

                for (i, p) in PROTOCOLS.iter().enumerate() {
                    let serviced = services(&r)[i] > before[i];
                    if serviced {
                        prop_assert!(enabled[i]);
                        prop_assert!(
                            before_mode == ChannelMode::Protocol(*p)
                                || after_mode == ChannelMode::Protocol(*p)
                        );
                    }
                }
                r.drain_events();
            }
        }

        #[test]
        fn fixed_mode_services_only_pinned(steps in prop::collection::vec(step(), 1..80)) {
            let config = ArbiterConfig {
                fixed_mode: Some(Protocol::Ysf),
                ..Default::default()
            };
            let mut r = rig(config, protocols());
            for (n, step) in steps.iter().enumerate() {
                let ms = n as u64 * 500;
                match step {
                    // Commands that would move off the pinned protocol are refused
                    Step::Rf(i) => r.rf(PROTOCOLS[*i]),
                    Step::Net(i) => r.net(PROTOCOLS[*i]),
                    _ => {}
                }
                r.tick(ms);
                prop_assert_eq!(r.mode(), ChannelMode::Protocol(Protocol::Ysf));
                prop_assert_eq!(r.controller(Protocol::DStar).services(), 0);
                prop_assert_eq!(r.controller(Protocol::Dmr).services(), 0);
                r.drain_events();
            }
        }

        #[test]
        fn quiet_channel_always_released(
            claims in prop::collection::vec(0..3usize, 1..10),
            quiet_secs in 4u64..20,
        ) {
            let mut r = rig(ArbiterConfig::default(), protocols());
            let mut ms = 0;
            for i in &claims {
                r.rf(PROTOCOLS[*i]);
                r.tick(ms);
                ms += 100;
            }
            prop_assert!(!r.mode().is_idle());

            // Both hang times (2s RF, 3s network) have passed
            r.tick(ms + quiet_secs * 1000);
            prop_assert_eq!(r.mode(), ChannelMode::Idle);
            prop_assert!(!r.marker.is_present());
        }
    }
}
