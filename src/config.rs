use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

pub const RC_CHANNELS: usize = 6;
pub const FRAME_LEN: usize = RC_CHANNELS * 2;

pub const RC_MIN: u16 = 1000;
pub const RC_CENTER: u16 = 1500;
pub const RC_MAX: u16 = 2000;

/// Full scale of the joystick potentiometers (3.3 V rail).
pub const ANALOG_FULL_SCALE_MV: u32 = 3300;
/// MCP3008 is a 10 bit converter. Divisor of the Vref transfer: the top
/// code 1023 reads 3296 mV, so a fully deflected stick maps to 1998, not 2000.
pub const ADC_MAX_READING: u32 = 1024;
pub const DEFAULT_VREF_MV: u32 = 3300;
pub const SAMPLES_PER_READ: usize = 64;

pub const SAMPLE_CADENCE_MS: u64 = 50;
pub const LIVENESS_TIMEOUT_MS: u64 = 1500;
pub const PRESENCE_POLL_MS: u64 = 1000;
pub const SEND_TIMEOUT_MS: u64 = 1000;
pub const CONNECT_TIMEOUT_MS: u64 = 1000;
pub const READ_POLL_MS: u64 = 20;
pub const SNAPSHOT_LOCK_MS: u64 = 5;
pub const DEBOUNCE_MS: u64 = 40;

pub const VEHICLE_URL: &str = "ws://192.168.4.5:81";
pub const VEHICLE_IP: &str = "192.168.4.5";
pub const AP_INTERFACE: &str = "wlan0";
pub const UI_PORT: u16 = 80;
pub const TELEMETRY_UDP_PORT: u16 = 8080;

pub const MAX_UI_CLIENTS: usize = 2;
pub const MAX_TELEMETRY_LEN: usize = 100;
pub const UI_CONNECT_MESSAGE: &str = "CONNECT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    /// Count stations in the kernel ARP table.
    Arp,
    /// Assume the vehicle is always associated (bench setups).
    Always,
}

/// Hardware wiring: which converter input or GPIO feeds each control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    pub right_x: u8,
    pub right_y: u8,
    pub left_x: u8,
    pub left_y: u8,
    pub switch1_up_pin: u8,
    pub switch1_down_pin: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        ChannelMap {
            right_x: 0,
            right_y: 1,
            left_x: 2,
            left_y: 3,
            switch1_up_pin: 23,
            switch1_down_pin: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub vehicle_url: String,
    pub vehicle_ip: Option<String>,
    pub ap_interface: String,
    pub presence: PresenceMode,
    pub ui_port: u16,
    pub telemetry_udp_port: u16,

    pub sample_cadence_ms: u64,
    pub samples_per_read: usize,
    pub debounce_ms: u64,
    pub liveness_timeout_ms: u64,
    pub presence_poll_ms: u64,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,

    pub channels: ChannelMap,
    pub led_pins: [u8; 2],
    pub calibration_path: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            vehicle_url: VEHICLE_URL.to_string(),
            vehicle_ip: Some(VEHICLE_IP.to_string()),
            ap_interface: AP_INTERFACE.to_string(),
            presence: PresenceMode::Arp,
            ui_port: UI_PORT,
            telemetry_udp_port: TELEMETRY_UDP_PORT,
            sample_cadence_ms: SAMPLE_CADENCE_MS,
            samples_per_read: SAMPLES_PER_READ,
            debounce_ms: DEBOUNCE_MS,
            liveness_timeout_ms: LIVENESS_TIMEOUT_MS,
            presence_poll_ms: PRESENCE_POLL_MS,
            send_timeout_ms: SEND_TIMEOUT_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            channels: ChannelMap::default(),
            led_pins: [16, 20],
            calibration_path: None,
        }
    }
}

impl ControllerConfig {
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Load from `path`, falling back to defaults when the file is missing or bad.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => {
                log::info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Using default configuration ({}: {})", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn sample_cadence(&self) -> Duration {
        Duration::from_millis(self.sample_cadence_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn presence_poll(&self) -> Duration {
        Duration::from_millis(self.presence_poll_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compile_time_constants() {
        let config = ControllerConfig::default();
        assert_eq!(config.liveness_timeout(), Duration::from_millis(1500));
        assert_eq!(config.presence_poll(), Duration::from_millis(1000));
        assert_eq!(config.send_timeout(), Duration::from_millis(1000));
        assert_eq!(config.vehicle_url, "ws://192.168.4.5:81");
        assert_eq!(FRAME_LEN, 12);
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");

        let mut config = ControllerConfig::default();
        config.vehicle_url = String::from("ws://10.0.0.7:81");
        config.presence = PresenceMode::Always;
        config.channels.left_y = 7;
        config.save(&path).unwrap();

        let loaded = ControllerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        fs::write(&path, r#"{ "presence_poll_ms": 250 }"#).unwrap();

        let loaded = ControllerConfig::load(&path).unwrap();
        assert_eq!(loaded.presence_poll_ms, 250);
        assert_eq!(loaded.liveness_timeout_ms, LIVENESS_TIMEOUT_MS);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(ControllerConfig::load(&path).is_err());
        assert_eq!(ControllerConfig::load_or_default(&path), ControllerConfig::default());
    }
}
