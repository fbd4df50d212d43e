use parking_lot::Mutex;
use rppal::gpio::{Gpio, OutputPin};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::signal::Shutdown;

const BLINK_PERIOD: Duration = Duration::from_millis(200);
const ACTIVITY_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Link,
    Telemetry,
}

impl Led {
    pub const ALL: [Led; 2] = [Led::Link, Led::Telemetry];

    fn index(self) -> usize {
        self as usize
    }
}

/// Fire-and-forget activity notification.
pub trait ActivityIndicator: Send + Sync {
    fn toggle(&self, led: Led);
}

pub struct NoIndicator;

impl ActivityIndicator for NoIndicator {
    fn toggle(&self, _led: Led) {}
}

/// Blink bookkeeping, independent of the GPIO pins.
#[derive(Debug, Default)]
pub struct BlinkState {
    last_activity: [Option<Instant>; 2],
    lit: [bool; 2],
}

impl BlinkState {
    pub fn stamp(&mut self, led: Led, now: Instant) {
        self.last_activity[led.index()] = Some(now);
    }

    /// Advance one blink period, returning the new level of every LED.
    pub fn tick(&mut self, now: Instant) -> [bool; 2] {
        for led in Led::ALL {
            let i = led.index();
            let active = self.last_activity[i]
                .is_some_and(|at| now.saturating_duration_since(at) < ACTIVITY_WINDOW);
            self.lit[i] = active && !self.lit[i];
        }
        self.lit
    }
}

/// Two GPIO LEDs blinking while their activity is recent.
pub struct LedBlinker {
    state: Arc<Mutex<BlinkState>>,
}

impl LedBlinker {
    pub fn start(pin_numbers: [u8; 2], shutdown: Arc<Shutdown>) -> rppal::gpio::Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins: Vec<OutputPin> = Vec::new();
        for pin_num in pin_numbers {
            let mut pin = gpio.get(pin_num)?.into_output();
            pin.set_low();
            log::info!("GPIO Led {} initialized", pin_num);
            pins.push(pin);
        }

        let state = Arc::new(Mutex::new(BlinkState::default()));
        let worker = Arc::clone(&state);
        let spawned = thread::Builder::new().name(String::from("leds")).spawn(move || {
            while shutdown.sleep(BLINK_PERIOD) {
                let levels = worker.lock().tick(Instant::now());
                for (pin, lit) in pins.iter_mut().zip(levels) {
                    if lit { pin.set_high() } else { pin.set_low() }
                }
            }
            for pin in &mut pins {
                pin.set_low();
            }
        });
        if let Err(e) = spawned {
            log::error!("Unable to start LED thread: {}", e);
        }

        Ok(LedBlinker { state })
    }
}

impl ActivityIndicator for LedBlinker {
    fn toggle(&self, led: Led) {
        self.state.lock().stamp(led, Instant::now());
    }
}
