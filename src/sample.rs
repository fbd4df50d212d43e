//! Periodic sampling of the operator inputs.
//!
//! The sampler owns the hardware readers and its working [`SampleSnapshot`].
//! Once per cycle it copies the whole snapshot into a [`SharedSnapshot`] and
//! raises the dispatcher's [`Signal`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::adc::{AnalogInput, Calibration, read_averaged};
use crate::buttons::{Debouncer, DigitalInput};
use crate::config::{ANALOG_FULL_SCALE_MV, ChannelMap, ControllerConfig, SNAPSHOT_LOCK_MS};
use crate::signal::{Shutdown, Signal};

pub const CHANNEL_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    RightX,
    RightY,
    LeftX,
    LeftY,
    Switch1Up,
    Switch1Down,
}

impl Channel {
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::RightX,
        Channel::RightY,
        Channel::LeftX,
        Channel::LeftY,
        Channel::Switch1Up,
        Channel::Switch1Down,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One channel reading. Switches report 0/1 with a voltage equivalent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub raw_value: u32,
    pub millivolts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSnapshot {
    samples: [Sample; CHANNEL_COUNT],
}

impl SampleSnapshot {
    pub fn get(&self, channel: Channel) -> Sample {
        self.samples[channel.index()]
    }

    pub fn set(&mut self, channel: Channel, sample: Sample) {
        self.samples[channel.index()] = sample;
    }

    pub fn with(mut self, channel: Channel, sample: Sample) -> Self {
        self.set(channel, sample);
        self
    }

    pub fn millivolts(&self, channel: Channel) -> u32 {
        self.get(channel).millivolts
    }

    pub fn raw(&self, channel: Channel) -> u32 {
        self.get(channel).raw_value
    }
}

/// Snapshot shared between the sampler (writer) and the dispatcher (reader).
///
/// The lock is only ever held for a bulk copy.
#[derive(Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<Mutex<SampleSnapshot>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the shared copy. Returns `false` when the lock could not be
    /// taken within `wait`; the copy is dropped in that case.
    pub fn publish(&self, snapshot: &SampleSnapshot, wait: Duration) -> bool {
        match self.inner.try_lock_for(wait) {
            Some(mut shared) => {
                *shared = *snapshot;
                true
            }
            None => false,
        }
    }

    pub fn get(&self) -> SampleSnapshot {
        *self.inner.lock()
    }
}

pub struct SampleSource<A, D> {
    analog: A,
    digital: D,
    calibration: Calibration,
    map: ChannelMap,
    oversample: usize,
    debounce: [Debouncer; 2],
    samples: SampleSnapshot,
    shared: SharedSnapshot,
    signal: Arc<Signal>,
}

impl<A: AnalogInput, D: DigitalInput> SampleSource<A, D> {
    pub fn new(
        analog: A,
        digital: D,
        calibration: Calibration,
        config: &ControllerConfig,
        shared: SharedSnapshot,
        signal: Arc<Signal>,
    ) -> Self {
        let window = config.debounce();
        SampleSource {
            analog,
            digital,
            calibration,
            map: config.channels.clone(),
            oversample: config.samples_per_read,
            debounce: [Debouncer::new(window), Debouncer::new(window)],
            samples: SampleSnapshot::default(),
            shared,
            signal,
        }
    }

    fn adc_channel(&self, channel: Channel) -> Option<u8> {
        match channel {
            Channel::RightX => Some(self.map.right_x),
            Channel::RightY => Some(self.map.right_y),
            Channel::LeftX => Some(self.map.left_x),
            Channel::LeftY => Some(self.map.left_y),
            Channel::Switch1Up | Channel::Switch1Down => None,
        }
    }

    /// Read every channel, publish the snapshot and wake the dispatcher.
    pub fn sample_once(&mut self, now: Instant) {
        for channel in Channel::ALL {
            if let Some(adc_channel) = self.adc_channel(channel) {
                match read_averaged(&mut self.analog, adc_channel, self.oversample) {
                    Ok(raw) => self.samples.set(
                        channel,
                        Sample {
                            raw_value: raw as u32,
                            millivolts: self.calibration.to_millivolts(raw),
                        },
                    ),
                    Err(e) => log::warn!("Failed reading {:?} (ADC {}): {}", channel, adc_channel, e),
                }
            } else {
                let index = channel.index() - Channel::Switch1Up.index();
                match self.digital.is_active(index) {
                    Ok(level) => {
                        let active = self.debounce[index].update(level, now);
                        self.samples.set(
                            channel,
                            Sample {
                                raw_value: active as u32,
                                millivolts: if active { ANALOG_FULL_SCALE_MV } else { 0 },
                            },
                        );
                    }
                    Err(e) => log::warn!("Failed reading {:?}: {}", channel, e),
                }
            }
        }

        if !self.shared.publish(&self.samples, Duration::from_millis(SNAPSHOT_LOCK_MS)) {
            log::warn!("Failed getting sample snapshot lock, dropping this cycle's copy");
        }
        self.signal.notify();
    }

    pub fn snapshot(&self) -> SampleSnapshot {
        self.samples
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }
}

impl<A, D> SampleSource<A, D>
where
    A: AnalogInput + 'static,
    D: DigitalInput + 'static,
{
    /// Run the sampling loop on its own thread every `cadence`.
    pub fn spawn(mut self, cadence: Duration, shutdown: Arc<Shutdown>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name(String::from("sampler")).spawn(move || {
            log::info!("Sampling every {:?}", cadence);
            loop {
                self.sample_once(Instant::now());
                if !shutdown.sleep(cadence) {
                    break;
                }
            }
            log::debug!("Sampler stopped");
        })
    }
}
