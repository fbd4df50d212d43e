use std::time::Duration;

/// Errors on the controller → vehicle link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link not connected")]
    NotConnected,

    #[error("transport reports disconnected")]
    TransportDown,

    #[error("partial write: {written} of {expected} bytes accepted, segmentation not supported")]
    PartialWrite { written: usize, expected: usize },

    #[error("link busy, send abandoned after {0:?}")]
    Busy(Duration),

    #[error("invalid vehicle url: {0}")]
    InvalidUrl(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection closed by peer")]
    Closed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while reading the input hardware.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("invalid channel {0}")]
    InvalidChannel(u8),

    #[error("calibration unavailable: {0}")]
    Calibration(String),
}

/// Inbound telemetry that violates framing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("segmented message: declared {declared} bytes, delivered {delivered}")]
    Segmented { declared: usize, delivered: usize },

    #[error("malformed bracket framing (start {first:?}, end {last:?})")]
    Framing { first: Option<u8>, last: Option<u8> },

    #[error("telemetry message of {len} bytes exceeds {max}")]
    Oversized { len: usize, max: usize },
}
