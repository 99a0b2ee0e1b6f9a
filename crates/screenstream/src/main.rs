use anyhow::Context;
use common::{TelemetryGuard, setup_logging};
use screenstream::{AppConfig, MinicapCommand, ScreenStream, ScreenrecordCommand, SourceKind};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Minicap process started by this binary; killed on drop.
struct MinicapProcess(Child);

impl Drop for MinicapProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
        tracing::info!("Minicap stopped");
    }
}

/// Launch minicap and forward its socket when the device size is known;
/// otherwise minicap is expected to be running already.
fn launch_minicap(config: &AppConfig) -> anyhow::Result<Option<MinicapProcess>> {
    let Some(device_size) = config.device_size else {
        return Ok(None);
    };

    let port = config
        .minicap_addr
        .rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .unwrap_or(screenstream::minicap::DEFAULT_PORT);

    let command = MinicapCommand::new(config.adb_path.clone(), device_size)
        .with_serial(config.adb_serial.clone())
        .with_port(port)
        .configured(&config.stream);

    let process = MinicapProcess(command.spawn().context("Failed to launch minicap")?);
    command.forward().context("Failed to forward minicap socket")?;

    tracing::info!(
        "Waiting {:?} for minicap to come up",
        config.minicap_start_delay
    );
    std::thread::sleep(config.minicap_start_delay);
    Ok(Some(process))
}

fn build_stream(config: &AppConfig) -> anyhow::Result<ScreenStream> {
    let stream = match config.source {
        SourceKind::Minicap => {
            tracing::info!("Using minicap source at {}", config.minicap_addr);
            ScreenStream::minicap(config.minicap_addr.clone(), config.stream.clone())?
        }
        SourceKind::Screenrecord => {
            let command = ScreenrecordCommand::new(config.adb_path.clone())
                .with_serial(config.adb_serial.clone());
            tracing::info!("Using screenrecord source via {}", config.adb_path);
            ScreenStream::screenrecord(command, codec_factory()?, config.stream.clone())?
        }
    };
    Ok(stream)
}

#[cfg(feature = "h264")]
fn codec_factory() -> anyhow::Result<Arc<dyn screenstream::CodecFactory>> {
    Ok(screenstream::codec::OpenH264Codec::factory())
}

#[cfg(not(feature = "h264"))]
fn codec_factory() -> anyhow::Result<Arc<dyn screenstream::CodecFactory>> {
    anyhow::bail!("SOURCE=screenrecord requires building with the `h264` feature")
}

/// Log stream status until shutdown or a fatal session error.
fn report(stream: &ScreenStream, shutdown: &AtomicBool, interval: Duration) -> anyhow::Result<()> {
    let mut last_report = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if last_report.elapsed() < interval {
            std::thread::sleep(SHUTDOWN_POLL);
            continue;
        }
        last_report = Instant::now();

        match stream.latest(SHUTDOWN_POLL) {
            Ok(frame) => {
                let stats = stream.stats();
                tracing::debug!(
                    "Status: [Seq: {}] [{}x{} {:?}] [Age: {:?}] [Published: {}] [Evicted: {}] [Skipped: {}] [Restarts: {}]",
                    frame.sequence(),
                    frame.width(),
                    frame.height(),
                    frame.layout(),
                    frame.age(),
                    stats.published,
                    stats.evicted,
                    stats.skipped,
                    stats.restarts
                );
            }
            Err(e) if e.is_recoverable() => {
                tracing::debug!("No frame yet ({}), state {}", e, stream.state());
            }
            Err(e) => return Err(e).context("Stream stopped producing frames"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    let _telemetry = config
        .otel_endpoint
        .as_ref()
        .map(|endpoint| TelemetryGuard::init("screenstream", endpoint))
        .transpose()?;

    setup_logging(config.environment, "screenstream", "info,screenstream=debug");

    tracing::info!(
        environment = config.environment.as_str(),
        config = ?config,
        "Loaded configuration"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&shutdown))?;
    flag::register(SIGINT, Arc::clone(&shutdown))?;

    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let _minicap = match config.source {
        SourceKind::Minicap => launch_minicap(&config)?,
        SourceKind::Screenrecord => None,
    };

    let stream = build_stream(&config)?;
    stream
        .start()
        .context("Failed to start stream - check that the device source is reachable")?;

    if let Some(banner) = stream.banner() {
        tracing::info!(
            "Source banner: v{} {:?} {}x{} (real {}x{}), orientation {}",
            banner.version,
            banner.format,
            banner.virtual_width,
            banner.virtual_height,
            banner.real_width,
            banner.real_height,
            banner.orientation
        );
    }

    let result = report(&stream, &shutdown, config.report_interval);
    stream.close();

    match result {
        Ok(()) => {
            tracing::info!("Stream stopped gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Stream failed: {:#}", e);
            Err(e)
        }
    }
}
