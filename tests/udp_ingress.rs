use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rover_link::indicator::{ActivityIndicator, Led};
use rover_link::relay::{TelemetryRelay, UdpIngress};
use rover_link::signal::Shutdown;

#[test]
fn bracketed_datagrams_reach_consumer() {
    let relay = Arc::new(TelemetryRelay::new());
    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    {
        let received = Arc::clone(&received);
        relay.register(move |bytes| received.lock().push(bytes.to_vec()));
    }

    let ingress = UdpIngress::bind("127.0.0.1:0").unwrap();
    let addr = ingress.local_addr();
    let shutdown = Arc::new(Shutdown::new());
    let handle = ingress.spawn(Arc::clone(&relay), Arc::clone(&shutdown)).unwrap();

    let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
    vehicle.send_to(b"[speed=12]", addr).unwrap();
    vehicle.send_to(b"speed=13]", addr).unwrap();
    vehicle.send_to(b"[speed=14", addr).unwrap();
    vehicle.send_to(b"[speed=15]", addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while received.lock().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(*received.lock(), vec![b"speed=12".to_vec(), b"speed=15".to_vec()]);
    assert_eq!(relay.forwarded(), 2);
}

#[test]
fn oversized_datagram_payload_is_dropped() {
    let relay = Arc::new(TelemetryRelay::new());
    let received = Arc::new(Mutex::new(0usize));
    {
        let received = Arc::clone(&received);
        relay.register(move |_| *received.lock() += 1);
    }

    let ingress = UdpIngress::bind("127.0.0.1:0").unwrap();
    let addr = ingress.local_addr();
    let shutdown = Arc::new(Shutdown::new());
    let handle = ingress.spawn(Arc::clone(&relay), Arc::clone(&shutdown)).unwrap();

    let mut datagram = vec![b'['];
    datagram.extend_from_slice(&[b'x'; 110]);
    datagram.push(b']');
    let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
    vehicle.send_to(&datagram, addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while relay.discarded() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(relay.discarded(), 1);
    assert_eq!(*received.lock(), 0);
}

#[derive(Default)]
struct Leds(Mutex<Vec<Led>>);

impl ActivityIndicator for Leds {
    fn toggle(&self, led: Led) {
        self.0.lock().push(led);
    }
}

#[test]
fn udp_telemetry_toggles_telemetry_led() {
    let leds = Arc::new(Leds::default());
    let relay = Arc::new(TelemetryRelay::with_indicator(Arc::clone(&leds) as Arc<dyn ActivityIndicator>));
    let received = Arc::new(Mutex::new(0usize));
    {
        let received = Arc::clone(&received);
        relay.register(move |_| *received.lock() += 1);
    }

    let ingress = UdpIngress::bind("127.0.0.1:0").unwrap();
    let addr = ingress.local_addr();
    let shutdown = Arc::new(Shutdown::new());
    let handle = ingress.spawn(Arc::clone(&relay), Arc::clone(&shutdown)).unwrap();

    let vehicle = UdpSocket::bind("127.0.0.1:0").unwrap();
    vehicle.send_to(b"batt=7400]", addr).unwrap();
    vehicle.send_to(b"[batt=7400]", addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    while *received.lock() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    shutdown.trigger();
    handle.join().unwrap();

    assert_eq!(*received.lock(), 1);
    assert_eq!(*leds.0.lock(), vec![Led::Telemetry]);
}
