//! Mindset Capture - NeuroSky Mindset headset reader
//!
//! Modes:
//! - `capture` (default): record samples from the headset and print the
//!   capture as JSON on stdout
//! - `serve`: host one session for a parent process (address handed off on stdout)
//! - `ports`: list serial ports

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mindset_capture::config::Config;
use mindset_capture::serial::list_ports;
use mindset_capture::service::{self, ServiceConfig};
use mindset_capture::{CaptureSession, DeviceSession, ReplaySession, Session, SessionState};

/// How often the capture loop drains the session
const POLL_INTERVAL: Duration = Duration::from_millis(125);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    // stdout carries data (capture JSON or the service handoff); logs go to stderr
    let level = if config.session.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "capture".to_string());
    match mode.as_str() {
        "capture" => run_capture(config).await,
        "serve" => run_service(config).await,
        "ports" => {
            for port in list_ports() {
                println!("{}", port);
            }
            Ok(())
        }
        other => bail!("unknown mode '{}' (expected capture, serve or ports)", other),
    }
}

async fn run_service(config: Config) -> Result<()> {
    let session: Arc<dyn Session> = match &config.replay_file {
        Some(path) => {
            let capture = CaptureSession::load(path)
                .with_context(|| format!("Failed to load capture {:?}", path))?;
            info!("Serving replay of {:?}", path);
            Arc::new(ReplaySession::new(capture))
        }
        None => {
            info!("Serving headset on {}", config.session.device);
            Arc::new(DeviceSession::new(config.session.clone()))
        }
    };

    let service_config = ServiceConfig {
        listen: config.listen,
    };
    // Only the handoff line goes to stdout; everything after it is logged to stderr
    service::serve(session, &service_config, std::io::stdout())
        .await
        .context("Session service failed")
}

async fn run_capture(config: Config) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let capture = tokio::task::spawn_blocking(move || capture_samples(&config, &interrupted))
        .await
        .context("Capture task failed")??;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &capture)?;
    writeln!(stdout)?;
    Ok(())
}

fn capture_samples(config: &Config, interrupted: &AtomicBool) -> Result<CaptureSession> {
    info!("===========================================");
    info!("   Mindset Capture");
    info!("===========================================");
    info!("Configuration:");
    info!("  Device: {}", config.session.device);
    info!("  Sync retries: {}", config.session.sync_retries);
    info!("  Read timeout: {:?}", config.session.read_timeout);
    info!("  Kinds: {:?}", config.capture_kinds.kinds().collect::<Vec<_>>());
    if let Some(seconds) = config.capture_seconds {
        info!("  Duration: {} s", seconds);
    }
    if let Some(count) = config.capture_count {
        info!("  Samples: {}", count);
    }

    let session = DeviceSession::new(config.session.clone());
    session
        .connect(None)
        .with_context(|| format!("Could not connect to {}", config.session.device))?;
    session.start()?;

    info!("Capturing... Press Ctrl+C to stop.");
    let started = Instant::now();
    let mut capture = CaptureSession::new();

    loop {
        std::thread::sleep(POLL_INTERVAL);

        let batch = session.read_batch()?;
        capture.append(batch.iter().filter(|s| config.capture_kinds.accepts(s)));

        if config.capture_count.is_some_and(|n| capture.total_len() >= n) {
            break;
        }
        if config
            .capture_seconds
            .is_some_and(|s| started.elapsed() >= Duration::from_secs(s))
        {
            break;
        }
        if interrupted.load(Ordering::SeqCst) {
            info!("Interrupted");
            break;
        }
        if session.state()? == SessionState::Stopped {
            warn!("Headset stream ended");
            break;
        }
    }

    session.disconnect()?;
    capture.finalize();
    info!("Captured {} samples. {}", capture.total_len(), session.stats()?);
    Ok(capture)
}
