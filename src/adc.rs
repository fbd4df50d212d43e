use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::config::{ADC_MAX_READING, DEFAULT_VREF_MV};
use crate::error::SampleError;

/// Anything that returns a raw conversion for a converter input.
pub trait AnalogInput: Send {
    fn read_raw(&mut self, channel: u8) -> Result<u16, SampleError>;
}

pub struct AdcReader {
    spi: Spi,
}

impl AdcReader {
    pub fn new() -> Result<Self, SampleError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;
        log::info!("MCP3008 ADC initialized on SPI0.0");
        Ok(AdcReader { spi })
    }
}

impl AnalogInput for AdcReader {
    fn read_raw(&mut self, channel: u8) -> Result<u16, SampleError> {
        if channel >= 8 {
            return Err(SampleError::InvalidChannel(channel));
        }

        let tx_buffer = [0x01, (0x08 | channel) << 4, 0x00];
        let mut rx_buffer = [0u8; 3];

        self.spi.transfer(&mut rx_buffer, &tx_buffer)?;

        Ok((((rx_buffer[1] & 0x03) as u16) << 8) | (rx_buffer[2] as u16))
    }
}

/// Average `count` consecutive conversions of one input.
pub fn read_averaged(input: &mut dyn AnalogInput, channel: u8, count: usize) -> Result<u16, SampleError> {
    let count = count.max(1);
    let mut total: u32 = 0;
    for _ in 0..count {
        total += input.read_raw(channel)? as u32;
    }
    Ok((total / count as u32) as u16)
}

/// Raw → millivolt characterisation, established once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Calibration {
    /// Two measured points on the transfer curve.
    TwoPoint {
        raw_low: u16,
        mv_low: u32,
        raw_high: u16,
        mv_high: u32,
    },
    /// Ideal converter against a measured reference voltage.
    Vref { vref_mv: u32 },
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::Vref { vref_mv: DEFAULT_VREF_MV }
    }
}

impl Calibration {
    pub fn to_millivolts(&self, raw: u16) -> u32 {
        match *self {
            Calibration::Vref { vref_mv } => raw as u32 * vref_mv / ADC_MAX_READING,
            Calibration::TwoPoint { raw_low, mv_low, raw_high, mv_high } => {
                if raw_high <= raw_low {
                    return Calibration::default().to_millivolts(raw);
                }
                let span_raw = (raw_high - raw_low) as i64;
                let span_mv = mv_high as i64 - mv_low as i64;
                let mv = mv_low as i64 + (raw as i64 - raw_low as i64) * span_mv / span_raw;
                mv.max(0) as u32
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Calibration::TwoPoint { .. } => "Two Point Value",
            Calibration::Vref { .. } => "Vref",
        }
    }
}

/// Where the calibration comes from.
pub trait CalibrationSource {
    fn characterize(&mut self) -> Result<Calibration, SampleError>;
}

/// Calibration stored as JSON, written by a bench characterisation run.
pub struct FileCalibration {
    path: PathBuf,
}

impl FileCalibration {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCalibration { path: path.into() }
    }
}

impl CalibrationSource for FileCalibration {
    fn characterize(&mut self) -> Result<Calibration, SampleError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| SampleError::Calibration(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SampleError::Calibration(format!("{}: {}", self.path.display(), e)))
    }
}

/// No stored calibration, always the default reference.
pub struct DefaultCalibration;

impl CalibrationSource for DefaultCalibration {
    fn characterize(&mut self) -> Result<Calibration, SampleError> {
        Ok(Calibration::default())
    }
}

/// Run the source once; a failure is logged and the default reference is used.
pub fn characterize(source: &mut dyn CalibrationSource) -> Calibration {
    let calibration = match source.characterize() {
        Ok(calibration) => calibration,
        Err(e) => {
            log::warn!("ADC calibration failed ({}), falling back to default Vref", e);
            Calibration::default()
        }
    };
    log::info!("Characterized using {}", calibration.describe());
    calibration
}
