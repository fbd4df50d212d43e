//! Peer presence on the access point, and the supervisor that turns it into
//! connect triggers.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::link::LinkSession;
use crate::signal::Shutdown;

/// ATF_COM: the entry has a resolved hardware address.
const ARP_FLAG_COMPLETE: u32 = 0x2;

pub trait PeerPresence: Send {
    /// Number of stations currently associated with the access point.
    fn peer_count(&mut self) -> io::Result<usize>;
}

/// Bench mode: the vehicle is assumed reachable at all times.
pub struct AlwaysPresent;

impl PeerPresence for AlwaysPresent {
    fn peer_count(&mut self) -> io::Result<usize> {
        Ok(1)
    }
}

/// Stations seen in the kernel ARP table on the access-point interface.
pub struct ArpTable {
    path: PathBuf,
    interface: String,
    peer_ip: Option<String>,
}

impl ArpTable {
    pub fn new(interface: impl Into<String>, peer_ip: Option<String>) -> Self {
        Self::with_path("/proc/net/arp", interface, peer_ip)
    }

    pub fn with_path(path: impl Into<PathBuf>, interface: impl Into<String>, peer_ip: Option<String>) -> Self {
        ArpTable {
            path: path.into(),
            interface: interface.into(),
            peer_ip,
        }
    }
}

impl PeerPresence for ArpTable {
    fn peer_count(&mut self) -> io::Result<usize> {
        let table = fs::read_to_string(&self.path)?;
        Ok(count_peers(&table, &self.interface, self.peer_ip.as_deref()))
    }
}

/// Count complete entries of `interface` in `/proc/net/arp` formatted text.
pub fn count_peers(table: &str, interface: &str, peer_ip: Option<&str>) -> usize {
    table
        .lines()
        .skip(1)
        .filter(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return false;
            }
            let flags = u32::from_str_radix(fields[2].trim_start_matches("0x"), 16).unwrap_or(0);
            flags & ARP_FLAG_COMPLETE != 0
                && fields[5] == interface
                && peer_ip.is_none_or(|ip| fields[0] == ip)
        })
        .count()
}

pub struct PresenceMonitor {
    presence: Box<dyn PeerPresence>,
    last_count: usize,
}

impl PresenceMonitor {
    pub fn new(presence: Box<dyn PeerPresence>) -> Self {
        PresenceMonitor { presence, last_count: 0 }
    }

    /// Poll once. Returns `true` when a connect attempt should be triggered.
    pub fn poll(&mut self, connected: bool) -> bool {
        let count = match self.presence.peer_count() {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Unable to read peer presence: {}", e);
                return false;
            }
        };

        if count > self.last_count {
            log::info!("Station associated ({} connected)", count);
        } else if count < self.last_count {
            log::info!("Station left ({} connected)", count);
        }
        self.last_count = count;

        count > 0 && !connected
    }

    pub fn spawn(
        mut self,
        session: Arc<LinkSession>,
        interval: Duration,
        shutdown: Arc<Shutdown>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(String::from("presence")).spawn(move || {
            log::info!("Polling peer presence every {:?}", interval);
            loop {
                if self.poll(session.is_connected()) {
                    session.peer_present();
                }
                if !shutdown.sleep(interval) {
                    break;
                }
            }
            log::debug!("Presence supervisor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.4.5      0x1         0x2         24:6f:28:aa:bb:cc     *        wlan0
192.168.4.9      0x1         0x0         00:00:00:00:00:00     *        wlan0
192.168.4.7      0x1         0x6         24:6f:28:aa:bb:dd     *        wlan0
10.0.0.1         0x1         0x2         52:54:00:12:34:56     *        eth0
";

    #[test]
    fn counts_complete_entries_on_interface() {
        assert_eq!(count_peers(TABLE, "wlan0", None), 2);
        assert_eq!(count_peers(TABLE, "eth0", None), 1);
        assert_eq!(count_peers(TABLE, "wlan0", Some("192.168.4.5")), 1);
        assert_eq!(count_peers(TABLE, "wlan0", Some("192.168.4.9")), 0);
        assert_eq!(count_peers("IP address HW type Flags\n", "wlan0", None), 0);
    }

    #[test]
    fn reads_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arp");
        fs::write(&path, TABLE).unwrap();

        let mut arp = ArpTable::with_path(&path, "wlan0", Some(String::from("192.168.4.5")));
        assert_eq!(arp.peer_count().unwrap(), 1);

        let mut missing = ArpTable::with_path(dir.path().join("nope"), "wlan0", None);
        assert!(missing.peer_count().is_err());
    }

    struct Scripted(VecDeque<io::Result<usize>>);

    impl PeerPresence for Scripted {
        fn peer_count(&mut self) -> io::Result<usize> {
            self.0.pop_front().unwrap_or(Ok(0))
        }
    }

    #[test]
    fn triggers_only_when_peer_present_and_disconnected() {
        let script = Scripted(VecDeque::from(vec![
            Ok(0),
            Ok(1),
            Ok(1),
            Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
            Ok(0),
        ]));
        let mut monitor = PresenceMonitor::new(Box::new(script));

        assert!(!monitor.poll(false));
        assert!(monitor.poll(false));
        assert!(!monitor.poll(true));
        assert!(!monitor.poll(false));
        assert!(!monitor.poll(false));
    }
}
