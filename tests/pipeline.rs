use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rover_link::adc::{AnalogInput, Calibration};
use rover_link::buttons::DigitalInput;
use rover_link::config::ControllerConfig;
use rover_link::dispatch::{Dispatch, Dispatcher, FrameSink};
use rover_link::error::{LinkError, SampleError};
use rover_link::frame::FrameBuilder;
use rover_link::sample::{SampleSource, SharedSnapshot};
use rover_link::signal::{Shutdown, Signal};

/// Joystick positions in raw 10-bit counts, shared with the test body.
#[derive(Clone)]
struct Sticks(Arc<Mutex<[u16; 8]>>);

impl AnalogInput for Sticks {
    fn read_raw(&mut self, channel: u8) -> Result<u16, SampleError> {
        self.0
            .lock()
            .get(channel as usize)
            .copied()
            .ok_or(SampleError::InvalidChannel(channel))
    }
}

#[derive(Clone)]
struct Switch(Arc<Mutex<[bool; 2]>>);

impl DigitalInput for Switch {
    fn is_active(&mut self, index: usize) -> Result<bool, SampleError> {
        Ok(self.0.lock()[index])
    }
}

#[derive(Default)]
struct Vehicle {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl FrameSink for Vehicle {
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }
}

struct Rig {
    source: SampleSource<Sticks, Switch>,
    dispatcher: Dispatcher,
    sticks: Sticks,
    switch: Switch,
    vehicle: Arc<Vehicle>,
    signal: Arc<Signal>,
}

fn rig() -> Rig {
    // 512 counts is mid travel; the top code 1023 reads 3296 mV
    let sticks = Sticks(Arc::new(Mutex::new([512, 0, 1023, 512, 0, 0, 0, 0])));
    let switch = Switch(Arc::new(Mutex::new([true, false])));
    let config = ControllerConfig {
        samples_per_read: 8,
        debounce_ms: 0,
        ..ControllerConfig::default()
    };
    let shared = SharedSnapshot::new();
    let signal = Arc::new(Signal::new());
    let vehicle = Arc::new(Vehicle::default());

    let source = SampleSource::new(
        sticks.clone(),
        switch.clone(),
        Calibration::default(),
        &config,
        shared.clone(),
        Arc::clone(&signal),
    );
    let dispatcher = Dispatcher::new(
        shared,
        Arc::clone(&signal),
        FrameBuilder::default(),
        Arc::clone(&vehicle) as Arc<dyn FrameSink>,
    );
    Rig {
        source,
        dispatcher,
        sticks,
        switch,
        vehicle,
        signal,
    }
}

#[test]
fn hardware_to_wire_bytes() {
    let mut rig = rig();
    rig.source.sample_once(Instant::now());

    assert_eq!(rig.dispatcher.dispatch_once(), Dispatch::Sent);
    assert_eq!(
        rig.vehicle.frames.lock()[0],
        vec![0xDC, 0x05, 0xE8, 0x03, 0xCE, 0x07, 0xDC, 0x05, 0xE8, 0x03, 0xDC, 0x05]
    );
}

#[test]
fn unchanged_inputs_are_not_resent() {
    let mut rig = rig();
    for _ in 0..5 {
        rig.source.sample_once(Instant::now());
        rig.dispatcher.dispatch_once();
    }
    assert_eq!(rig.vehicle.frames.lock().len(), 1);

    rig.switch.0.lock()[0] = false;
    rig.switch.0.lock()[1] = true;
    rig.source.sample_once(Instant::now());
    assert_eq!(rig.dispatcher.dispatch_once(), Dispatch::Sent);

    let frames = rig.vehicle.frames.lock();
    assert_eq!(frames.len(), 2);
    // switch slot now reports the "down" position
    assert_eq!(frames[1][8..10], 2000u16.to_le_bytes());
}

#[test]
fn threaded_pipeline_follows_stick_movement() {
    let Rig {
        source,
        dispatcher,
        sticks,
        vehicle,
        signal,
        ..
    } = rig();
    let shutdown = Arc::new(Shutdown::new());

    let dispatch_thread = dispatcher.spawn().unwrap();
    let sampler = source.spawn(Duration::from_millis(10), Arc::clone(&shutdown)).unwrap();

    let wait_frames = |count: usize| {
        let deadline = Instant::now() + Duration::from_secs(3);
        while vehicle.frames.lock().len() < count {
            assert!(Instant::now() < deadline, "expected {} frames", count);
            thread::sleep(Duration::from_millis(5));
        }
    };

    wait_frames(1);
    sticks.0.lock()[1] = 1023;
    wait_frames(2);

    shutdown.trigger();
    sampler.join().unwrap();
    signal.close();
    dispatch_thread.join().unwrap();

    let frames = vehicle.frames.lock();
    assert_eq!(frames.len(), 2);
    // full deflection falls two counts short of the range top
    assert_eq!(frames[1][2..4], 1998u16.to_le_bytes());
}
