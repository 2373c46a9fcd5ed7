//! UDP link to a protocol gateway
//!
//! Each protocol with a network talks to one gateway over UDP. A background
//! task owns the socket; the arbiter side only sees bounded queues, so a slow
//! or silent gateway never blocks a tick.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dvh_protocol::Protocol;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::NetworkAdapter;
use crate::state::NetworkSettings;

const QUEUE_DEPTH: usize = 128;
const MAX_DATAGRAM: usize = 2048;

/// Time after the last datagram during which the network counts as active
pub const DEFAULT_NET_WINDOW: Duration = Duration::from_millis(500);

/// Network adapter exchanging frames with a gateway over UDP
#[derive(Debug)]
pub struct UdpNetwork {
    protocol: Protocol,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    window: Duration,
    last_inbound: Option<Instant>,
}

impl UdpNetwork {
    /// Bind the local address and start exchanging with the gateway
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bind(protocol: Protocol, settings: &NetworkSettings) -> io::Result<Self> {
        let socket = UdpSocket::bind(settings.local).await?;
        info!(
            "{} network bound to {} (gateway {})",
            protocol,
            socket.local_addr()?,
            settings.gateway
        );
        Ok(Self::from_socket(protocol, socket, settings.gateway))
    }

    /// Wrap an already bound socket
    pub fn from_socket(protocol: Protocol, socket: UdpSocket, gateway: SocketAddr) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);

        tokio::spawn(run_udp_io(protocol, socket, gateway, inbound_tx, outbound_rx));

        Self {
            protocol,
            inbound_rx,
            outbound_tx,
            pending: VecDeque::new(),
            window: DEFAULT_NET_WINDOW,
            last_inbound: None,
        }
    }

    /// Change the activity window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    fn drain(&mut self) {
        let mut received = false;
        while let Ok(frame) = self.inbound_rx.try_recv() {
            self.pending.push_back(frame);
            received = true;
        }
        if received {
            self.last_inbound = Some(Instant::now());
        }
    }
}

impl NetworkAdapter for UdpNetwork {
    fn has_inbound_activity(&mut self) -> bool {
        self.drain();
        !self.pending.is_empty()
            || self
                .last_inbound
                .is_some_and(|t| t.elapsed() < self.window)
    }

    fn forward_to_channel(&mut self) -> Vec<Vec<u8>> {
        self.drain();
        self.pending.drain(..).collect()
    }

    fn forward_from_channel(&mut self, frame: &[u8]) {
        match self.outbound_tx.try_send(frame.to_vec()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{} network queue full, dropping frame", self.protocol)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{} network task gone, dropping frame", self.protocol)
            }
        }
    }
}

async fn run_udp_io(
    protocol: Protocol,
    socket: UdpSocket,
    gateway: SocketAddr,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
) {
    let mut buffer = [0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = socket.send_to(&frame, gateway).await {
                            debug!("{} send to {} failed: {}", protocol, gateway, e);
                        }
                    }
                    None => break,
                }
            }

            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((n, from)) if from == gateway => {
                        if inbound_tx.try_send(buffer[..n].to_vec()).is_err() {
                            warn!("{} inbound queue full, dropping datagram", protocol);
                        }
                    }
                    Ok((_, from)) => {
                        debug!("{} ignoring datagram from {}", protocol, from);
                    }
                    Err(e) => {
                        // ICMP unreachable from a gateway that is not up yet
                        debug!("{} receive error: {}", protocol, e);
                    }
                }
            }
        }
    }

    debug!("{} network task ended", protocol);
}
