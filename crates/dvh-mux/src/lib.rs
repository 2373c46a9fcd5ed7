//! Digital-Voice Mode Arbiter
//!
//! This crate decides which protocol owns the single RF channel of a
//! multi-protocol modem, and services that protocol while it holds it.
//!
//! # Architecture
//!
//! The [`Arbiter`] is driven by a periodic tick. Each tick it:
//!
//! - polls the modem and enters `ERROR` on failure
//! - looks for RF and network activity on every enabled protocol
//! - lets the first active protocol claim an idle channel
//! - services only the owning protocol and drops everyone else's traffic
//! - releases the channel when the owner's hang time or the mode timeout
//!   runs out
//!
//! Protocol behavior lives behind three seams: [`ProtocolController`]
//! (per-protocol state machine), [`NetworkAdapter`] (gateway link) and
//! [`ModemAdapter`] (the modem link). [`FrameRelay`], [`UdpNetwork`] and
//! [`AsyncModem`] are the stock implementations; the `dvh-sim` crate has
//! scriptable ones for tests.
//!
//! Observers get an [`ArbiterEvent`] stream through an [`EventSink`], and a
//! [`PresenceMarker`] mirrors the current owner to the filesystem for other
//! processes.
//!
//! # Example
//!
//! ```rust,no_run
//! use dvh_mux::{Arbiter, ArbiterConfig, FrameRelay, LockFile, ProtocolDescriptor, TracingSink};
//! use dvh_protocol::Protocol;
//! # fn modem() -> Box<dyn dvh_mux::ModemAdapter> { unimplemented!() }
//!
//! let mut arbiter = Arbiter::new(
//!     ArbiterConfig::default(),
//!     vec![
//!         ProtocolDescriptor::new(Protocol::DStar, Box::new(FrameRelay::new(Protocol::DStar))),
//!         ProtocolDescriptor::new(Protocol::Dmr, Box::new(FrameRelay::new(Protocol::Dmr))),
//!     ],
//!     modem(),
//!     Box::new(TracingSink),
//!     Box::new(LockFile::new("/tmp/dvhost.lock")),
//! )?;
//!
//! arbiter.tick(std::time::Instant::now());
//! # Ok::<(), dvh_mux::ArbiterError>(())
//! ```

pub mod actor;
pub mod async_modem;
pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod lookup;
pub mod marker;
pub mod net_udp;
pub mod relay;
pub mod remote;
pub mod state;
pub mod timer;

// Re-export actor types
pub use actor::{run_arbiter, HostCommand};

// Re-export collaborator seams
pub use async_modem::AsyncModem;
pub use channel::{ChannelIo, ModemAdapter, NetworkAdapter, ProtocolController, ServiceResult};
pub use net_udp::UdpNetwork;
pub use relay::FrameRelay;

pub use engine::{Arbiter, ArbiterConfig, CwIdConfig};
pub use error::{ArbiterError, LookupError, ModemError};
pub use events::{ArbiterEvent, EventSink, NullSink, TracingSink};
pub use lookup::IdLookup;
pub use marker::{LockFile, NoMarker, PresenceMarker};
pub use remote::RemoteControl;
pub use state::{
    ChannelMode, ChannelState, NetworkSettings, Origin, ProtocolDescriptor, ProtocolSettings,
};
pub use timer::Timer;
