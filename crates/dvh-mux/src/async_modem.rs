//! Async link to an MMDVM-style modem
//!
//! The modem is reached over a serial port or over UDP. Either way a spawned
//! task decodes frames with [`ModemCodec`] and writes encoded
//! [`ModemRequest`]s. The arbiter side, [`AsyncModem`], only ever talks to
//! that task through channels, so none of its [`ModemAdapter`] methods block.
//!
//! `AsyncModem::from_io` accepts any `AsyncRead + AsyncWrite`, which is how
//! the tests drive it with `tokio::io::duplex()`.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use dvh_protocol::frame::MODE_IDLE;
use dvh_protocol::{
    EncodeCommand, FrameCodec, ModemCodec, ModemFrame, ModemRequest, ModemStatusFlags, Protocol,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, trace, warn};

use crate::channel::ModemAdapter;
use crate::error::ModemError;

/// How often the modem is asked for its status
const STATUS_INTERVAL: Duration = Duration::from_millis(250);

/// Frames buffered in each direction between the arbiter and the I/O task
const QUEUE_DEPTH: usize = 256;

/// Received frames kept per protocol before the oldest are dropped
const MAX_PENDING: usize = 512;

const MAX_DATAGRAM: usize = 1024;

/// Messages from the I/O task to the adapter
#[derive(Debug)]
enum Inbound {
    Frame(Protocol, Vec<u8>),
    Status(ModemStatusFlags),
}

/// Modem adapter backed by a serial or UDP I/O task
pub struct AsyncModem {
    name: String,
    inbound_rx: mpsc::Receiver<Inbound>,
    outbound_tx: mpsc::Sender<ModemRequest>,
    pending: HashMap<Protocol, VecDeque<Vec<u8>>>,
    status: ModemStatusFlags,
    connected: bool,
}

impl AsyncModem {
    /// Open a serial port and start the I/O task
    ///
    /// Must be called from inside a tokio runtime.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, ModemError> {
        let stream = tokio_serial::new(port, baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .map_err(|e| {
                let available = list_ports();
                error!(
                    "Failed to open modem on {}: {} (available ports: {})",
                    port,
                    e,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                );
                ModemError::Open {
                    port: port.to_string(),
                    reason: e.to_string(),
                }
            })?;

        info!("Opened modem on {} at {} baud", port, baud_rate);
        Ok(Self::from_io(port.to_string(), stream))
    }

    /// Bind a local UDP socket and exchange frames with a networked modem
    ///
    /// Must be called from inside a tokio runtime.
    pub async fn connect_udp(local: SocketAddr, modem: SocketAddr) -> Result<Self, ModemError> {
        let socket = UdpSocket::bind(local).await.map_err(|e| {
            error!("Failed to bind {} for modem {}: {}", local, modem, e);
            ModemError::Open {
                port: modem.to_string(),
                reason: e.to_string(),
            }
        })?;

        match socket.local_addr() {
            Ok(bound) => info!("Modem at {} over UDP from {}", modem, bound),
            Err(_) => info!("Modem at {} over UDP", modem),
        }
        Ok(Self::from_socket(socket, modem))
    }

    /// Start the I/O task over an already bound socket
    pub fn from_socket(socket: UdpSocket, modem: SocketAddr) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);

        tokio::spawn(run_udp_io(socket, modem, inbound_tx, outbound_rx));

        Self::with_channels(modem.to_string(), inbound_rx, outbound_tx)
    }

    /// Start the I/O task over any byte stream
    pub fn from_io<T>(name: String, io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);

        tokio::spawn(run_modem_io(name.clone(), io, inbound_tx, outbound_rx));

        Self::with_channels(name, inbound_rx, outbound_tx)
    }

    fn with_channels(
        name: String,
        inbound_rx: mpsc::Receiver<Inbound>,
        outbound_tx: mpsc::Sender<ModemRequest>,
    ) -> Self {
        Self {
            name,
            inbound_rx,
            outbound_tx,
            pending: HashMap::new(),
            status: ModemStatusFlags::default(),
            connected: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move everything the I/O task produced into the per-protocol queues
    fn drain(&mut self) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(Inbound::Frame(protocol, frame)) => {
                    let queue = self.pending.entry(protocol).or_default();
                    if queue.len() >= MAX_PENDING {
                        queue.pop_front();
                    }
                    queue.push_back(frame);
                }
                Ok(Inbound::Status(status)) => self.status = status,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.connected {
                        warn!("Modem I/O task for {} has stopped", self.name);
                    }
                    self.connected = false;
                    break;
                }
            }
        }
    }

    fn send(&self, request: ModemRequest) -> Result<(), ModemError> {
        self.outbound_tx.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => ModemError::QueueFull,
            TrySendError::Closed(_) => ModemError::Disconnected,
        })
    }
}

impl ModemAdapter for AsyncModem {
    fn poll(&mut self) -> Result<ModemStatusFlags, ModemError> {
        self.drain();
        if !self.connected {
            return Err(ModemError::Disconnected);
        }
        Ok(self.status)
    }

    fn read_frame(&mut self, protocol: Protocol) -> Option<Vec<u8>> {
        self.drain();
        self.pending.get_mut(&protocol)?.pop_front()
    }

    fn write_frame(&mut self, protocol: Protocol, frame: &[u8]) -> Result<(), ModemError> {
        self.send(ModemRequest::from_type_prefixed(protocol, frame))
    }

    fn send_cw_id(&mut self, callsign: &str) -> Result<(), ModemError> {
        self.send(ModemRequest::SendCwId(callsign.to_string()))
    }

    fn set_channel_mode(&mut self, protocol: Option<Protocol>) -> Result<(), ModemError> {
        let mode = protocol.map(|p| p.modem_mode()).unwrap_or(MODE_IDLE);
        self.send(ModemRequest::SetMode(mode))
    }
}

fn list_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!("Could not enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

async fn write_request<T>(io: &mut T, request: &ModemRequest) -> std::io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let bytes = request.encode();
    trace!("Modem TX {:02X?}", bytes);
    io.write_all(&bytes).await?;
    io.flush().await
}

/// I/O loop: runs until the port fails or the adapter is dropped
async fn run_modem_io<T>(
    name: String,
    mut io: T,
    inbound_tx: mpsc::Sender<Inbound>,
    mut outbound_rx: mpsc::Receiver<ModemRequest>,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!("Starting modem I/O on {}", name);

    let mut codec = ModemCodec::new();
    let mut buffer = vec![0u8; 1024];
    let mut status_timer = interval(STATUS_INTERVAL);
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    if let Err(e) = write_request(&mut io, &ModemRequest::GetVersion).await {
        warn!("Failed to query modem version on {}: {}", name, e);
        return;
    }

    loop {
        tokio::select! {
            request = outbound_rx.recv() => {
                let Some(request) = request else {
                    debug!("Modem adapter for {} dropped", name);
                    break;
                };
                if let Err(e) = write_request(&mut io, &request).await {
                    warn!("Write error on {}: {}", name, e);
                    break;
                }
            }

            _ = status_timer.tick() => {
                if let Err(e) = write_request(&mut io, &ModemRequest::GetStatus).await {
                    warn!("Write error on {}: {}", name, e);
                    break;
                }
            }

            result = io.read(&mut buffer) => {
                match result {
                    Ok(0) => {
                        warn!("Modem {} closed the connection", name);
                        break;
                    }
                    Ok(n) => {
                        trace!("Modem RX {:02X?}", &buffer[..n]);
                        codec.push_bytes(&buffer[..n]);
                        while let Some(frame) = codec.next_frame() {
                            dispatch(&name, frame, &inbound_tx);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("Read error on {}: {}", name, e);
                        break;
                    }
                }
            }
        }
    }

    info!("Modem I/O ended on {}", name);
}

/// UDP loop: one datagram carries one or more modem frames
async fn run_udp_io(
    socket: UdpSocket,
    modem: SocketAddr,
    inbound_tx: mpsc::Sender<Inbound>,
    mut outbound_rx: mpsc::Receiver<ModemRequest>,
) {
    let name = modem.to_string();
    info!("Starting modem I/O on {}", name);

    let mut codec = ModemCodec::new();
    let mut buffer = [0u8; MAX_DATAGRAM];
    let mut status_timer = interval(STATUS_INTERVAL);
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    if let Err(e) = socket.send_to(&ModemRequest::GetVersion.encode(), modem).await {
        warn!("Failed to query modem version on {}: {}", name, e);
        return;
    }

    loop {
        let request = tokio::select! {
            request = outbound_rx.recv() => match request {
                Some(request) => request,
                None => {
                    debug!("Modem adapter for {} dropped", name);
                    break;
                }
            },

            _ = status_timer.tick() => ModemRequest::GetStatus,

            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((n, from)) if from == modem => {
                        trace!("Modem RX {:02X?}", &buffer[..n]);
                        codec.push_bytes(&buffer[..n]);
                        while let Some(frame) = codec.next_frame() {
                            dispatch(&name, frame, &inbound_tx);
                        }
                    }
                    Ok((_, from)) => debug!("Ignoring datagram from {}", from),
                    // ICMP unreachable while the modem is restarting
                    Err(e) => debug!("Receive error on {}: {}", name, e),
                }
                continue;
            }
        };

        let bytes = request.encode();
        trace!("Modem TX {:02X?}", bytes);
        if let Err(e) = socket.send_to(&bytes, modem).await {
            debug!("Send to {} failed: {}", name, e);
        }
    }

    info!("Modem I/O ended on {}", name);
}

fn dispatch(name: &str, frame: ModemFrame, inbound_tx: &mpsc::Sender<Inbound>) {
    let message = match &frame {
        ModemFrame::Data { protocol, .. } => match frame.to_type_prefixed() {
            Some(bytes) => Inbound::Frame(*protocol, bytes),
            None => return,
        },
        ModemFrame::Status(flags) => Inbound::Status(*flags),
        ModemFrame::Version {
            protocol_version,
            description,
        } => {
            info!(
                "Modem {} protocol v{}: {}",
                name, protocol_version, description
            );
            return;
        }
        ModemFrame::Lost { protocol } => {
            debug!("Modem {} lost {} signal", name, protocol);
            return;
        }
        ModemFrame::Ack { command } => {
            trace!("Modem {} ACK 0x{:02X}", name, command);
            return;
        }
        ModemFrame::Nak { command, reason } => {
            warn!(
                "Modem {} rejected command 0x{:02X} (reason {})",
                name, command, reason
            );
            return;
        }
        ModemFrame::Unknown { frame_type, .. } => {
            debug!("Modem {} sent unhandled frame 0x{:02X}", name, frame_type);
            return;
        }
    };

    if let Err(TrySendError::Full(_)) = inbound_tx.try_send(message) {
        warn!("Modem {} inbound queue full, dropping frame", name);
    }
}
