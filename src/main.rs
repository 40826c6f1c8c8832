use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use color_eyre::eyre::Error;
use dv_text_monitor::{
    VERSION,
    config::{
        Overrides,
        Settings,
    },
    console::{
        self,
        Console,
    },
    framer::Timeouts,
    monitor::{
        Monitor,
        Serial,
        SerialConfig,
    },
    receiver::Receiver,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load_or_create(&config_path)?;
    settings.apply(&args.overrides);
    tracing::info!(?settings, "loaded settings");

    let console = Console::stdout(args.log_file.as_deref(), args.overwrite);
    console.println(&format!("DV text monitor {VERSION}"));

    let serial_config = SerialConfig {
        path: settings.port.clone(),
        baud_rate: settings.baud_rate,
        poll_interval: args.poll_interval,
    };
    let port = match Serial::open(&serial_config) {
        Ok(port) => port,
        Err(error) => {
            tracing::error!(?error, port = %serial_config.path, "failed to open serial port");
            console.println(&format!(
                "Could not open serial port {}: {error}",
                serial_config.path
            ));
            return Ok(());
        }
    };
    console.println(&format!(
        "Opened {} at {} baud. MY={} UR={}",
        serial_config.path, serial_config.baud_rate, settings.my, settings.ur
    ));

    let identity = Arc::new(Mutex::new(settings.identity()));
    let (queue, queued) = mpsc::unbounded_channel();
    console::spawn_input(identity.clone(), queue, console.clone())?;

    let receiver = Receiver::new(Timeouts {
        packet: args.packet_timeout,
        picture: args.picture_timeout,
    });
    let monitor = Monitor::new(port, receiver, identity, queued, console.clone());

    let shutdown = CancellationToken::new();
    let mut handle = tokio::task::spawn_blocking({
        let shutdown = shutdown.clone();
        move || monitor.run(&shutdown)
    });

    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            shutdown.cancel();
            handle.await
        }
    };

    match result? {
        Ok(()) => {}
        Err(error) => {
            tracing::error!(?error, "monitor failed");
            console.println(&format!("Serial error: {error}"));
        }
    }

    tracing::info!("exiting");
    console.println("Exiting...");

    // the input thread blocks on stdin and is left to die with the process
    Ok(())
}

/// Send and receive D-STAR text messages through an RS-MS1A compatible radio.
#[derive(Debug, Parser)]
pub struct Args {
    /// Settings file. Defaults to `dvtextmonitor.ini` next to the executable.
    #[clap(long, env = "DVTM_CONFIG")]
    config: Option<PathBuf>,

    #[clap(flatten)]
    overrides: Overrides,

    /// How long to wait for the rest of a packet.
    #[clap(long, default_value = "4s", value_parser = humantime::parse_duration)]
    packet_timeout: Duration,

    /// How long to wait for the rest of a `$$Pic` packet.
    #[clap(long, default_value = "15s", value_parser = humantime::parse_duration)]
    picture_timeout: Duration,

    /// Serial read timeout.
    #[clap(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    poll_interval: Duration,

    /// Duplicate all output to this file.
    log_file: Option<PathBuf>,

    /// Truncate the log file instead of appending to it.
    #[clap(long, requires = "log_file")]
    overwrite: bool,
}
