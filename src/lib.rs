//! Control link of a remote-controlled rover.
//!
//! Operator inputs are sampled on a fixed cadence, turned into 12-byte RC
//! frames and sent to the vehicle over a WebSocket whenever they change.
//! Telemetry coming back is relayed to the local web UI.

pub mod adc;
pub mod buttons;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod indicator;
pub mod link;
pub mod presence;
pub mod relay;
pub mod sample;
pub mod signal;
pub mod ui;
pub mod watchdog;
pub mod websocket;

use std::io::Write;

/// Install the global logger. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
