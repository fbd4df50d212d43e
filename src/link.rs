//! Connection lifecycle of the controller → vehicle link.
//!
//! [`LinkSession`] is the single owner of the link state. Every event (peer
//! presence, connect completion, inbound traffic, transport loss, watchdog
//! expiry, stop) goes through [`LinkSession::handle`], which applies the
//! transition under one mutex and performs any resulting I/O after releasing
//! it. Connect attempts and the per-connection reader run on their own
//! threads and report back through the same entry point.
//!
//! ```text
//! Idle ──PeerPresent──▶ Connecting ──ConnectSucceeded──▶ Connected
//!  ▲                        │                               │
//!  └──────ConnectFailed─────┘      Disconnected / Stop ─────┤
//!  ▲                                                        │
//!  └──────PeerPresent────── TimedOut ◀──WatchdogExpired─────┘
//! ```

use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ControllerConfig;
use crate::error::LinkError;
use crate::indicator::{ActivityIndicator, Led};
use crate::relay::{TelemetryMessage, TelemetryRelay};
use crate::watchdog::Watchdog;

/// Something read off the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(TelemetryMessage),
    /// Keep-alive traffic: refreshes liveness, nothing to relay.
    Activity,
}

/// An established transport to the vehicle.
pub trait Link: Send {
    fn is_connected(&self) -> bool;

    /// Write one message, blocking at most `timeout`. Returns the number of
    /// payload bytes accepted.
    fn send(&mut self, payload: &[u8], timeout: Duration) -> Result<usize, LinkError>;

    /// Poll for inbound traffic, waiting at most a short transport-defined
    /// interval. `Ok(None)` means nothing arrived.
    fn recv(&mut self) -> Result<Option<Inbound>, LinkError>;

    fn close(&mut self);
}

/// Opens links. Called from the connect thread, may block up to its own timeout.
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Link>, LinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    TimedOut,
}

/// Single permit guarding connect attempts.
#[derive(Debug, Default)]
pub struct ConnectGate {
    taken: AtomicBool,
}

impl ConnectGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking. `false` when an attempt already holds the permit.
    pub fn try_acquire(&self) -> bool {
        self.taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Return the permit. Releasing a free permit is a bug and panics.
    pub fn release(&self) {
        if !self.taken.swap(false, Ordering::AcqRel) {
            panic!("connect gate released while not held");
        }
    }

    pub fn is_available(&self) -> bool {
        !self.taken.load(Ordering::Acquire)
    }
}

pub enum LinkEvent {
    PeerPresent,
    ConnectSucceeded { attempt: u64, link: Box<dyn Link> },
    ConnectFailed { attempt: u64, reason: String },
    Inbound { epoch: u64, message: Inbound },
    Disconnected { epoch: u64, reason: String },
    WatchdogExpired { generation: u64 },
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub connect_attempts: u64,
    pub connections: u64,
    pub timeouts: u64,
    pub disconnects: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub liveness_timeout: Duration,
    pub send_timeout: Duration,
}

impl LinkTiming {
    pub fn from_config(config: &ControllerConfig) -> Self {
        LinkTiming {
            liveness_timeout: config.liveness_timeout(),
            send_timeout: config.send_timeout(),
        }
    }
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

type SharedLink = Arc<Mutex<Box<dyn Link>>>;

struct SessionInner {
    state: LinkState,
    link: Option<SharedLink>,
    attempt: u64,
    epoch: u64,
    watchdog_generation: Option<u64>,
    stats: LinkStats,
}

/// Work decided under the state lock, carried out after it is released.
enum Action {
    Connect(u64),
    Read { epoch: u64, link: SharedLink },
    Close(SharedLink),
    Publish(TelemetryMessage),
}

pub struct LinkSession {
    inner: Mutex<SessionInner>,
    gate: ConnectGate,
    connector: Arc<dyn Connector>,
    relay: Arc<TelemetryRelay>,
    indicator: Arc<dyn ActivityIndicator>,
    watchdog: Watchdog,
    timing: LinkTiming,
}

impl LinkSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        relay: Arc<TelemetryRelay>,
        indicator: Arc<dyn ActivityIndicator>,
        timing: LinkTiming,
    ) -> io::Result<Arc<Self>> {
        let session = Arc::new(LinkSession {
            inner: Mutex::new(SessionInner {
                state: LinkState::Idle,
                link: None,
                attempt: 0,
                epoch: 0,
                watchdog_generation: None,
                stats: LinkStats::default(),
            }),
            gate: ConnectGate::new(),
            connector,
            relay,
            indicator,
            watchdog: Watchdog::new(),
            timing,
        });

        let weak = Arc::downgrade(&session);
        session.watchdog.start("link-watchdog", move |generation| {
            if let Some(session) = weak.upgrade() {
                session.handle(LinkEvent::WatchdogExpired { generation });
            }
        })?;
        Ok(session)
    }

    /// Feed one event to the state machine.
    pub fn handle(self: &Arc<Self>, event: LinkEvent) {
        let action = {
            let mut inner = self.inner.lock();
            self.transition(&mut inner, event)
        };
        if let Some(action) = action {
            self.perform(action);
        }
    }

    pub fn peer_present(self: &Arc<Self>) {
        self.handle(LinkEvent::PeerPresent);
    }

    pub fn stop(self: &Arc<Self>) {
        self.handle(LinkEvent::Stop);
    }

    fn transition(&self, inner: &mut SessionInner, event: LinkEvent) -> Option<Action> {
        match event {
            LinkEvent::PeerPresent => {
                if inner.state == LinkState::Connected {
                    return None;
                }
                if !self.gate.try_acquire() {
                    log::warn!("Connection attempt already in progress");
                    return None;
                }
                if inner.state == LinkState::TimedOut {
                    log::info!("Link state TimedOut -> Idle");
                }
                inner.state = LinkState::Connecting;
                inner.attempt += 1;
                inner.stats.connect_attempts += 1;
                log::info!("Link state Idle -> Connecting (attempt {})", inner.attempt);
                Some(Action::Connect(inner.attempt))
            }

            LinkEvent::ConnectSucceeded { attempt, link } => {
                self.gate.release();
                let link: SharedLink = Arc::new(Mutex::new(link));
                if inner.state != LinkState::Connecting || attempt != inner.attempt {
                    log::warn!("Dropping connection from abandoned attempt {}", attempt);
                    return Some(Action::Close(link));
                }
                inner.epoch += 1;
                inner.state = LinkState::Connected;
                inner.link = Some(Arc::clone(&link));
                inner.stats.connections += 1;
                inner.watchdog_generation = Some(self.watchdog.arm(self.timing.liveness_timeout));
                log::info!("Link state Connecting -> Connected (epoch {})", inner.epoch);
                Some(Action::Read { epoch: inner.epoch, link })
            }

            LinkEvent::ConnectFailed { attempt, reason } => {
                self.gate.release();
                if inner.state == LinkState::Connecting && attempt == inner.attempt {
                    inner.state = LinkState::Idle;
                    log::warn!("Connection attempt {} failed: {}", attempt, reason);
                } else {
                    log::debug!("Abandoned attempt {} failed: {}", attempt, reason);
                }
                None
            }

            LinkEvent::Inbound { epoch, message } => {
                if inner.state != LinkState::Connected || epoch != inner.epoch {
                    log::trace!("Ignoring inbound traffic from stale connection {}", epoch);
                    return None;
                }
                inner.watchdog_generation = Some(self.watchdog.arm(self.timing.liveness_timeout));
                match message {
                    Inbound::Data(message) => {
                        inner.stats.messages_received += 1;
                        Some(Action::Publish(message))
                    }
                    Inbound::Activity => None,
                }
            }

            LinkEvent::Disconnected { epoch, reason } => {
                if inner.state != LinkState::Connected || epoch != inner.epoch {
                    return None;
                }
                log::warn!("Link lost: {}", reason);
                inner.stats.disconnects += 1;
                inner.state = LinkState::Idle;
                self.teardown(inner)
            }

            LinkEvent::WatchdogExpired { generation } => {
                if inner.state != LinkState::Connected || inner.watchdog_generation != Some(generation) {
                    log::debug!("Ignoring stale watchdog expiry {}", generation);
                    return None;
                }
                log::error!(
                    "No activity from vehicle for {:?}, tearing down link",
                    self.timing.liveness_timeout
                );
                inner.stats.timeouts += 1;
                inner.state = LinkState::TimedOut;
                self.teardown(inner)
            }

            LinkEvent::Stop => {
                if inner.state != LinkState::Idle {
                    log::info!("Link state {:?} -> Idle (stop)", inner.state);
                }
                inner.state = LinkState::Idle;
                self.teardown(inner)
            }
        }
    }

    fn teardown(&self, inner: &mut SessionInner) -> Option<Action> {
        self.watchdog.disarm();
        inner.watchdog_generation = None;
        inner.link.take().map(Action::Close)
    }

    fn perform(self: &Arc<Self>, action: Action) {
        match action {
            Action::Connect(attempt) => self.spawn_connect(attempt),
            Action::Read { epoch, link } => self.spawn_reader(epoch, link),
            Action::Close(link) => link.lock().close(),
            Action::Publish(message) => {
                // rejected messages are logged by the relay
                let _ = self.relay.publish_message(&message);
            }
        }
    }

    fn spawn_connect(self: &Arc<Self>, attempt: u64) {
        let weak = Arc::downgrade(self);
        let connector = Arc::clone(&self.connector);
        let spawned = thread::Builder::new()
            .name(String::from("link-connect"))
            .spawn(move || {
                let event = match connector.connect() {
                    Ok(link) => LinkEvent::ConnectSucceeded { attempt, link },
                    Err(e) => LinkEvent::ConnectFailed { attempt, reason: e.to_string() },
                };
                match weak.upgrade() {
                    Some(session) => session.handle(event),
                    None => {
                        if let LinkEvent::ConnectSucceeded { mut link, .. } = event {
                            link.close();
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            self.handle(LinkEvent::ConnectFailed {
                attempt,
                reason: format!("unable to start connect thread: {}", e),
            });
        }
    }

    fn spawn_reader(self: &Arc<Self>, epoch: u64, link: SharedLink) {
        let weak = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name(String::from("link-reader"))
            .spawn(move || read_loop(&weak, epoch, &link));
        if let Err(e) = spawned {
            self.handle(LinkEvent::Disconnected {
                epoch,
                reason: format!("unable to start reader thread: {}", e),
            });
        }
    }

    /// Send one complete frame.
    ///
    /// Succeeds only when the session is `Connected`, the transport reports
    /// itself connected and the whole payload went out in one write. Waits at
    /// most the send timeout for the link; never retries.
    pub fn send(&self, payload: &[u8]) -> Result<(), LinkError> {
        let link = {
            let inner = self.inner.lock();
            match (inner.state, &inner.link) {
                (LinkState::Connected, Some(link)) => Arc::clone(link),
                _ => return Err(LinkError::NotConnected),
            }
        };

        let result = self.write(&link, payload);
        {
            let mut inner = self.inner.lock();
            match result {
                Ok(()) => inner.stats.frames_sent += 1,
                Err(_) => inner.stats.send_failures += 1,
            }
        }
        if result.is_ok() {
            self.indicator.toggle(Led::Link);
        }
        result
    }

    fn write(&self, link: &SharedLink, payload: &[u8]) -> Result<(), LinkError> {
        // lock wait and write share one budget
        let timeout = self.timing.send_timeout;
        let deadline = Instant::now() + timeout;
        let mut link = link.try_lock_until(deadline).ok_or(LinkError::Busy(timeout))?;
        if !link.is_connected() {
            return Err(LinkError::TransportDown);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LinkError::Busy(timeout));
        }
        let written = link.send(payload, remaining)?;
        if written != payload.len() {
            log::error!(
                "Partial write ({} of {} bytes), message segmentation is not supported",
                written,
                payload.len()
            );
            return Err(LinkError::PartialWrite {
                written,
                expected: payload.len(),
            });
        }
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn stats(&self) -> LinkStats {
        self.inner.lock().stats
    }

    pub fn gate_available(&self) -> bool {
        self.gate.is_available()
    }

    pub fn current_epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        let inner = self.inner.lock();
        inner.state == LinkState::Connected && inner.epoch == epoch
    }
}

fn read_loop(session: &Weak<LinkSession>, epoch: u64, link: &SharedLink) {
    log::debug!("Reader for connection {} started", epoch);
    loop {
        let received = {
            let mut guard = link.lock();
            let received = guard.recv();
            // let a waiting sender in before the next poll
            MutexGuard::unlock_fair(guard);
            received
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        match received {
            Ok(Some(message)) => session.handle(LinkEvent::Inbound { epoch, message }),
            Ok(None) => {
                if !session.is_current(epoch) {
                    break;
                }
            }
            Err(e) => {
                session.handle(LinkEvent::Disconnected {
                    epoch,
                    reason: e.to_string(),
                });
                break;
            }
        }
    }
    log::debug!("Reader for connection {} stopped", epoch);
}
