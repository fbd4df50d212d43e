//! Bench stand-in for the vehicle: accepts the controller's WebSocket, logs
//! received RC frames and answers with periodic telemetry.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tungstenite::{Message, WebSocket, accept};

use rover_link::config::{FRAME_LEN, READ_POLL_MS};
use rover_link::frame::OutputFrame;

#[derive(Parser, Debug)]
#[command(name = "rover_sim", about = "Simulated rover for bench testing the controller link")]
struct Args {
    /// Address to accept the controller on
    #[arg(long, default_value = "0.0.0.0:81")]
    listen: String,

    /// Telemetry period in milliseconds
    #[arg(long, default_value_t = 500)]
    telemetry_ms: u64,
}

#[derive(Debug, Serialize)]
struct Telemetry {
    ts: i64,
    frames: u64,
    ch: [u16; 6],
}

fn serve_controller(mut socket: WebSocket<TcpStream>, period: Duration) -> Result<()> {
    socket.get_ref().set_read_timeout(Some(Duration::from_millis(READ_POLL_MS)))?;

    let mut frames: u64 = 0;
    let mut channels = [0u16; 6];
    let mut next_telemetry = Instant::now();

    loop {
        if Instant::now() >= next_telemetry {
            let telemetry = Telemetry {
                ts: chrono::Utc::now().timestamp_millis(),
                frames,
                ch: channels,
            };
            socket.send(Message::Text(serde_json::to_string(&telemetry)?))?;
            next_telemetry += period;
        }

        match socket.read() {
            Ok(Message::Binary(data)) => match OutputFrame::from_bytes(&data) {
                Some(frame) => {
                    frames += 1;
                    channels = frame.values();
                    log::info!("Frame {}: {:?}", frames, channels);
                }
                None => log::warn!("Unexpected {} byte message (expected {})", data.len(), FRAME_LEN),
            },
            Ok(Message::Close(_)) => {
                log::info!("Controller closed the connection");
                return Ok(());
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

fn main() -> Result<()> {
    rover_link::init_logging();
    let args = Args::parse();
    let period = Duration::from_millis(args.telemetry_ms);

    let server = TcpListener::bind(&args.listen)?;
    log::info!("Simulated rover listening on {}", args.listen);

    for stream in server.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Connection error: {}", e);
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        let socket = match accept(stream) {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("WebSocket handshake error: {}", e);
                continue;
            }
        };
        log::info!("Controller connected from {:?}", peer);
        if let Err(e) = serve_controller(socket, period) {
            log::warn!("Controller connection lost: {}", e);
        }
    }
    Ok(())
}
