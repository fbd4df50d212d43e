use serde::{Deserialize, Serialize};

use crate::config::{ANALOG_FULL_SCALE_MV, FRAME_LEN, RC_CENTER, RC_CHANNELS, RC_MAX, RC_MIN};
use crate::sample::{Channel, SampleSnapshot};

/// Output pulse-width range of an RC channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcRange {
    pub min: u16,    // Minimum output value
    pub center: u16, // Neutral output value
    pub max: u16,    // Maximum output value
}

impl Default for RcRange {
    fn default() -> Self {
        RcRange {
            min: RC_MIN,
            center: RC_CENTER,
            max: RC_MAX,
        }
    }
}

impl RcRange {
    /// Map `[0, full_scale_mv]` linearly onto `[min, max]`, clamping outside values.
    pub fn transform_millivolts(&self, millivolts: u32, full_scale_mv: u32) -> u16 {
        let input = millivolts.min(full_scale_mv) as i64;
        let out_range = self.max as i64 - self.min as i64;
        if full_scale_mv == 0 {
            return self.min;
        }
        let output = self.min as i64 + input * out_range / full_scale_mv as i64;
        output.clamp(self.min as i64, self.max as i64) as u16
    }

    /// Decode a three position switch: neither contact → center, up → min,
    /// down or both → max.
    pub fn apply_switch(&self, up: bool, down: bool) -> u16 {
        if !up && !down {
            self.center
        } else if up && !down {
            self.min
        } else {
            self.max
        }
    }
}

/// The wire payload: one pulse width per RC channel, little-endian on the wire.
///
/// Slot order: right X, right Y, left X, left Y, switch 1, filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame([u16; RC_CHANNELS]);

impl OutputFrame {
    pub fn new(values: [u16; RC_CHANNELS]) -> Self {
        OutputFrame(values)
    }

    pub fn values(&self) -> [u16; RC_CHANNELS] {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        for (slot, value) in bytes.chunks_exact_mut(2).zip(self.0) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FRAME_LEN {
            return None;
        }
        let mut values = [0u16; RC_CHANNELS];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(2)) {
            *value = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        Some(OutputFrame(values))
    }
}

/// Turns snapshots into frames and remembers the last one handed out for sending.
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    range: RcRange,
    last_sent: Option<[u8; FRAME_LEN]>,
}

impl FrameBuilder {
    pub fn new(range: RcRange) -> Self {
        FrameBuilder { range, last_sent: None }
    }

    pub fn frame_for(&self, snapshot: &SampleSnapshot) -> OutputFrame {
        let axis = |channel: Channel| self.range.transform_millivolts(snapshot.millivolts(channel), ANALOG_FULL_SCALE_MV);
        OutputFrame([
            axis(Channel::RightX),
            axis(Channel::RightY),
            axis(Channel::LeftX),
            axis(Channel::LeftY),
            self.range.apply_switch(
                snapshot.raw(Channel::Switch1Up) != 0,
                snapshot.raw(Channel::Switch1Down) != 0,
            ),
            self.range.center,
        ])
    }

    /// Build the candidate frame and compare it byte for byte with the last
    /// sent one. A changed candidate becomes the new "last sent".
    pub fn build(&mut self, snapshot: &SampleSnapshot) -> (OutputFrame, bool) {
        let frame = self.frame_for(snapshot);
        let bytes = frame.to_bytes();
        if self.last_sent == Some(bytes) {
            return (frame, false);
        }
        self.last_sent = Some(bytes);
        (frame, true)
    }

    /// Drop the retained frame so the next build reports a change.
    pub fn forget_last_sent(&mut self) {
        self.last_sent = None;
    }

    pub fn last_sent(&self) -> Option<OutputFrame> {
        self.last_sent.and_then(|bytes| OutputFrame::from_bytes(&bytes))
    }
}
