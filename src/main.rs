use anyhow::{Context, Result};
use clap::Parser;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rover_link::adc::{AdcReader, DefaultCalibration, FileCalibration, characterize};
use rover_link::buttons::SwitchReader;
use rover_link::config::{ControllerConfig, PresenceMode};
use rover_link::dispatch::{Dispatcher, FrameSink};
use rover_link::frame::FrameBuilder;
use rover_link::indicator::{ActivityIndicator, LedBlinker, NoIndicator};
use rover_link::link::{Connector, LinkSession, LinkTiming};
use rover_link::presence::{AlwaysPresent, ArpTable, PeerPresence, PresenceMonitor};
use rover_link::relay::{TelemetryRelay, UdpIngress};
use rover_link::sample::{SampleSource, SharedSnapshot};
use rover_link::signal::{Shutdown, Signal};
use rover_link::ui::UiServer;
use rover_link::websocket::WsConnector;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "rover-link", version, about = "Rover controller: inputs to vehicle link, telemetry to web UI")]
struct Args {
    /// JSON configuration file
    #[arg(long, default_value = "rover-link.json")]
    config: PathBuf,

    /// Override the vehicle WebSocket URL
    #[arg(long)]
    vehicle_url: Option<String>,

    /// How to detect that the vehicle joined the access point
    #[arg(long, value_enum)]
    presence: Option<PresenceMode>,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

fn main() -> Result<()> {
    rover_link::init_logging();
    let args = Args::parse();

    if args.write_default_config {
        ControllerConfig::default()
            .save(&args.config)
            .with_context(|| format!("writing {}", args.config.display()))?;
        log::info!("Default configuration written to {}", args.config.display());
        return Ok(());
    }

    let mut config = ControllerConfig::load_or_default(&args.config);
    if let Some(url) = args.vehicle_url {
        config.vehicle_url = url;
    }
    if let Some(presence) = args.presence {
        config.presence = presence;
    }
    log::info!("Starting rover controller link to {}", config.vehicle_url);

    let shutdown = Arc::new(Shutdown::new());

    let calibration = match &config.calibration_path {
        Some(path) => characterize(&mut FileCalibration::new(path)),
        None => characterize(&mut DefaultCalibration),
    };
    let adc = AdcReader::new().context("opening MCP3008")?;
    let switches = SwitchReader::new(&[config.channels.switch1_up_pin, config.channels.switch1_down_pin])
        .context("opening switch inputs")?;

    let indicator: Arc<dyn ActivityIndicator> = match LedBlinker::start(config.led_pins, Arc::clone(&shutdown)) {
        Ok(leds) => Arc::new(leds),
        Err(e) => {
            log::warn!("Activity LEDs unavailable: {}", e);
            Arc::new(NoIndicator)
        }
    };

    // Telemetry: vehicle -> relay -> browsers
    let ui = UiServer::new();
    let listener = TcpListener::bind(("0.0.0.0", config.ui_port))
        .with_context(|| format!("binding UI port {}", config.ui_port))?;
    ui.serve(listener)?;

    let relay = Arc::new(TelemetryRelay::with_indicator(Arc::clone(&indicator)));
    {
        let ui = Arc::clone(&ui);
        relay.register(move |bytes| ui.push(bytes));
    }
    match UdpIngress::bind(("0.0.0.0", config.telemetry_udp_port)) {
        Ok(ingress) => {
            ingress.spawn(Arc::clone(&relay), Arc::clone(&shutdown))?;
        }
        Err(e) => log::error!("Telemetry UDP port {} unavailable: {}", config.telemetry_udp_port, e),
    }

    // Link to the vehicle
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(&config));
    let session = LinkSession::new(
        connector,
        Arc::clone(&relay),
        Arc::clone(&indicator),
        LinkTiming::from_config(&config),
    )?;

    let presence: Box<dyn PeerPresence> = match config.presence {
        PresenceMode::Arp => Box::new(ArpTable::new(config.ap_interface.clone(), config.vehicle_ip.clone())),
        PresenceMode::Always => Box::new(AlwaysPresent),
    };
    let supervisor = PresenceMonitor::new(presence).spawn(
        Arc::clone(&session),
        config.presence_poll(),
        Arc::clone(&shutdown),
    )?;

    // Inputs -> frames -> link
    let shared = SharedSnapshot::new();
    let signal = Arc::new(Signal::new());
    let source = SampleSource::new(adc, switches, calibration, &config, shared.clone(), Arc::clone(&signal));
    let dispatcher = Dispatcher::new(
        shared,
        Arc::clone(&signal),
        FrameBuilder::default(),
        Arc::clone(&session) as Arc<dyn FrameSink>,
    );
    let dispatch_thread = dispatcher.spawn()?;
    let sampler = source.spawn(config.sample_cadence(), Arc::clone(&shutdown))?;

    while shutdown.sleep(STATS_INTERVAL) {
        if sampler.is_finished() || dispatch_thread.is_finished() {
            log::error!("Worker thread stopped, shutting down");
            break;
        }
        let stats = session.stats();
        log::info!(
            "Link {:?}: {} frames sent, {} failed, {} telemetry, {} timeouts, {} reconnects",
            session.state(),
            stats.frames_sent,
            stats.send_failures,
            stats.messages_received,
            stats.timeouts,
            stats.connections.saturating_sub(1)
        );
    }

    shutdown.trigger();
    signal.close();
    session.stop();
    let _ = sampler.join();
    let _ = dispatch_thread.join();
    let _ = supervisor.join();
    Ok(())
}
