use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::LinkError;
use crate::frame::FrameBuilder;
use crate::link::LinkSession;
use crate::sample::SharedSnapshot;
use crate::signal::Signal;

/// Where built frames go.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError>;
}

impl FrameSink for LinkSession {
    fn send_frame(&self, frame: &[u8]) -> Result<(), LinkError> {
        self.send(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Unchanged,
    Sent,
    Failed,
}

/// Turns published snapshots into frames and hands changed ones to the sink.
pub struct Dispatcher {
    shared: SharedSnapshot,
    signal: Arc<Signal>,
    builder: FrameBuilder,
    sink: Arc<dyn FrameSink>,
}

impl Dispatcher {
    pub fn new(shared: SharedSnapshot, signal: Arc<Signal>, builder: FrameBuilder, sink: Arc<dyn FrameSink>) -> Self {
        Dispatcher {
            shared,
            signal,
            builder,
            sink,
        }
    }

    pub fn dispatch_once(&mut self) -> Dispatch {
        let snapshot = self.shared.get();
        let (frame, changed) = self.builder.build(&snapshot);
        if !changed {
            return Dispatch::Unchanged;
        }

        match self.sink.send_frame(&frame.to_bytes()) {
            Ok(()) => {
                log::trace!("Sent frame {:?}", frame.values());
                Dispatch::Sent
            }
            Err(e) => {
                match e {
                    LinkError::NotConnected => log::debug!("Frame not sent: {}", e),
                    _ => log::warn!("Frame send failed: {}", e),
                }
                // resend on the next cycle
                self.builder.forget_last_sent();
                Dispatch::Failed
            }
        }
    }

    /// Dispatch on every signal until the signal is closed.
    pub fn run(mut self) {
        let mut seen = 0;
        while let Some(generation) = self.signal.wait_newer(seen) {
            seen = generation;
            self.dispatch_once();
        }
        log::debug!("Dispatcher stopped");
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new().name(String::from("dispatcher")).spawn(move || self.run())
    }
}
