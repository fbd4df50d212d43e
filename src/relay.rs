//! Inbound telemetry path: vehicle → controller → local consumer (web UI).

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::MAX_TELEMETRY_LEN;
use crate::error::RelayError;
use crate::indicator::{ActivityIndicator, Led, NoIndicator};
use crate::signal::Shutdown;

/// One inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    /// Length announced by the transport for the whole message.
    pub declared_len: usize,
    pub payload: Vec<u8>,
}

impl TelemetryMessage {
    pub fn new(payload: Vec<u8>) -> Self {
        TelemetryMessage {
            declared_len: payload.len(),
            payload,
        }
    }

    /// Fails when only a segment of a larger message was delivered.
    pub fn check(&self) -> Result<&[u8], RelayError> {
        if self.declared_len != self.payload.len() {
            return Err(RelayError::Segmented {
                declared: self.declared_len,
                delivered: self.payload.len(),
            });
        }
        Ok(&self.payload)
    }
}

type Consumer = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Forwards telemetry verbatim to one registered consumer.
///
/// Every accepted message, whichever path it came in on, toggles the
/// telemetry LED.
pub struct TelemetryRelay {
    consumer: OnceLock<Consumer>,
    indicator: Arc<dyn ActivityIndicator>,
    forwarded: AtomicU64,
    discarded: AtomicU64,
}

impl Default for TelemetryRelay {
    fn default() -> Self {
        Self::with_indicator(Arc::new(NoIndicator))
    }
}

impl TelemetryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indicator(indicator: Arc<dyn ActivityIndicator>) -> Self {
        TelemetryRelay {
            consumer: OnceLock::new(),
            indicator,
            forwarded: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Register the consumer. Registering twice is a wiring bug and panics.
    pub fn register<F>(&self, consumer: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        if self.consumer.set(Box::new(consumer)).is_err() {
            panic!("telemetry consumer registered twice");
        }
    }

    pub fn has_consumer(&self) -> bool {
        self.consumer.get().is_some()
    }

    /// Forward `bytes` to the consumer, if any.
    pub fn publish(&self, bytes: &[u8]) -> Result<(), RelayError> {
        if bytes.len() > MAX_TELEMETRY_LEN {
            return Err(self.discard(RelayError::Oversized {
                len: bytes.len(),
                max: MAX_TELEMETRY_LEN,
            }));
        }
        if let Some(consumer) = self.consumer.get() {
            consumer(bytes);
            self.forwarded.fetch_add(1, Ordering::Relaxed);
        }
        self.indicator.toggle(Led::Telemetry);
        Ok(())
    }

    /// Validate a transport message and forward it.
    pub fn publish_message(&self, message: &TelemetryMessage) -> Result<(), RelayError> {
        match message.check() {
            Ok(payload) => self.publish(payload),
            Err(e) => Err(self.discard(e)),
        }
    }

    fn discard(&self, error: RelayError) -> RelayError {
        log::error!("Discarding telemetry: {}", error);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        error
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

/// Payload strictly between a leading `[` and a trailing `]`.
pub fn parse_bracketed(datagram: &[u8]) -> Result<&[u8], RelayError> {
    match datagram {
        [b'[', payload @ .., b']'] => Ok(payload),
        _ => Err(RelayError::Framing {
            first: datagram.first().copied(),
            last: datagram.last().copied(),
        }),
    }
}

const UDP_BUFFER_LEN: usize = 128;
const UDP_POLL: Duration = Duration::from_millis(200);
const UDP_RETRY: Duration = Duration::from_secs(1);

/// Raw UDP telemetry ingress, one bracket-framed datagram per message.
pub struct UdpIngress {
    socket: UdpSocket,
    addr: SocketAddr,
}

impl UdpIngress {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        let addr = socket.local_addr()?;
        log::info!("Telemetry socket bound, port {}", addr.port());
        Ok(UdpIngress { socket, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn spawn(self, relay: Arc<TelemetryRelay>, shutdown: Arc<Shutdown>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(String::from("udp-telemetry"))
            .spawn(move || self.run(&relay, &shutdown))
    }

    fn run(self, relay: &TelemetryRelay, shutdown: &Shutdown) {
        let addr = self.addr;
        let mut socket = Some(self.socket);

        while !shutdown.is_triggered() {
            let current = match socket.take() {
                Some(socket) => socket,
                None => match UdpSocket::bind(addr) {
                    Ok(socket) => {
                        log::info!("Telemetry socket re-created on port {}", addr.port());
                        socket
                    }
                    Err(e) => {
                        log::error!("Unable to bind telemetry socket {}: {}", addr, e);
                        shutdown.sleep(UDP_RETRY);
                        continue;
                    }
                },
            };
            if let Err(e) = current.set_read_timeout(Some(UDP_POLL)) {
                log::error!("Unable to configure telemetry socket: {}", e);
                shutdown.sleep(UDP_RETRY);
                continue;
            }
            if receive_until_error(&current, relay, shutdown).is_err() {
                log::error!("Shutting down telemetry socket and restarting...");
            }
        }
        log::debug!("UDP telemetry ingress stopped");
    }
}

fn receive_until_error(socket: &UdpSocket, relay: &TelemetryRelay, shutdown: &Shutdown) -> io::Result<()> {
    let mut buffer = [0u8; UDP_BUFFER_LEN];
    while !shutdown.is_triggered() {
        let (len, source) = match socket.recv_from(&mut buffer[..UDP_BUFFER_LEN - 1]) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => continue,
            Err(e) => {
                log::error!("recvfrom failed: {}", e);
                return Err(e);
            }
        };
        match parse_bracketed(&buffer[..len]) {
            Ok(payload) => {
                // oversized payloads are logged by the relay
                let _ = relay.publish(payload);
            }
            Err(e) => log::error!("Dropping datagram from {}: {}", source, e),
        }
    }
    Ok(())
}
