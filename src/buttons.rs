use rppal::gpio::{Gpio, InputPin, Level};
use std::time::{Duration, Instant};

use crate::error::SampleError;

/// Instantaneous level of a switch input, `true` when active.
pub trait DigitalInput: Send {
    fn is_active(&mut self, index: usize) -> Result<bool, SampleError>;
}

/// Switch contacts wired to 3.3 V with the internal pull-down enabled.
pub struct SwitchReader {
    pins: Vec<InputPin>,
}

impl SwitchReader {
    pub fn new(pin_numbers: &[u8]) -> Result<Self, SampleError> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();

        for &pin_num in pin_numbers {
            let pin = gpio.get(pin_num)?.into_input_pulldown();
            log::info!("GPIO {} initialized", pin_num);
            pins.push(pin);
        }

        Ok(SwitchReader { pins })
    }
}

impl DigitalInput for SwitchReader {
    fn is_active(&mut self, index: usize) -> Result<bool, SampleError> {
        match self.pins.get(index) {
            Some(pin) => Ok(pin.read() == Level::High),
            None => Err(SampleError::InvalidChannel(index as u8)),
        }
    }
}

/// Reports a level only once it has been stable for the debounce window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    current: bool,
    stable: bool,
    last_change: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            current: false,
            stable: false,
            last_change: None,
        }
    }

    pub fn update(&mut self, level: bool, now: Instant) -> bool {
        let Some(last_change) = self.last_change else {
            // first read primes the filter
            self.current = level;
            self.stable = level;
            self.last_change = Some(now);
            return level;
        };

        if level != self.current {
            self.current = level;
            self.last_change = Some(now);
        } else if self.current != self.stable
            && now.saturating_duration_since(last_change) >= self.window
        {
            self.stable = self.current;
        }

        if self.window.is_zero() {
            self.stable = self.current;
        }
        self.stable
    }

    pub fn stable(&self) -> bool {
        self.stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_read_is_taken_as_is() {
        let mut debouncer = Debouncer::new(Duration::from_millis(40));
        assert!(debouncer.update(true, Instant::now()));
    }

    #[test]
    fn bounce_is_filtered() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(40));
        assert!(!debouncer.update(false, t0));

        assert!(!debouncer.update(true, t0 + Duration::from_millis(10)));
        assert!(!debouncer.update(false, t0 + Duration::from_millis(20)));
        assert!(!debouncer.update(true, t0 + Duration::from_millis(30)));
        assert!(!debouncer.update(true, t0 + Duration::from_millis(50)));
        assert!(debouncer.update(true, t0 + Duration::from_millis(70)));
        assert!(debouncer.stable());
    }

    #[test]
    fn zero_window_follows_input() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::ZERO);
        assert!(!debouncer.update(false, t0));
        assert!(debouncer.update(true, t0));
        assert!(!debouncer.update(false, t0));
    }
}
