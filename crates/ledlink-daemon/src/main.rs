//! LED Link Daemon
//!
//! Runs on the Raspberry Pi: answers strip commands arriving on the USB
//! serial gadget port and drives the configured LED strips.

mod config;
mod sink;
mod throttle;

use anyhow::{Context, Result};
use ledlink_core::backoff::Backoff;
use ledlink_core::device::serve;
use ledlink_core::{Responder, SerialConnector, Session, StripSink};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use sink::LogSink;
use throttle::{ErrorThrottle, Report};

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/ledlinkd.toml".to_string());

    let config = Config::load(&config_path).context("Failed to load configuration")?;
    info!("Loaded configuration from: {}", config_path);

    let mut responder = Responder::new(LogSink::new(config.strips.clone()), config.initial_status());
    responder
        .sink_mut()
        .blackout()
        .context("Failed to clear strips")?;

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = serve_loop(&config, &mut responder) => {}
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    if let Err(e) = responder.sink_mut().blackout() {
        warn!("Failed to turn strips off: {}", e);
    }
    Ok(())
}

/// Opens the gadget port and answers the host, reopening with backoff.
async fn serve_loop(config: &Config, responder: &mut Responder<LogSink>) {
    let mut connector = SerialConnector::new(config.baud_rate);
    let mut backoff = Backoff::new(&config.backoff);
    let mut open_errors = ErrorThrottle::new(Duration::from_secs(60));

    loop {
        let mut session = match Session::open(&mut connector, &config.device).await {
            Ok(session) => session.with_max_buffer(config.max_buffer),
            Err(e) => {
                match open_errors.record() {
                    Report::First => warn!("Open error: {}", e),
                    Report::Repeated { count, over } => {
                        warn!("Open error (repeated {} times in {:?}): {}", count, over, e)
                    }
                    Report::Suppressed => debug!("Open error: {}", e),
                }
                tokio::time::sleep(backoff.next_delay()).await;
                continue;
            }
        };

        info!("Listening for commands on {}", session.endpoint());
        backoff.reset();
        open_errors.reset();

        if let Err(e) = serve(&mut session, responder, config.poll()).await {
            warn!("Session on {} ended: {}", session.endpoint(), e);
        }
        if session.discarded_bytes() > 0 {
            info!(
                "Discarded {} invalid bytes during session",
                session.discarded_bytes()
            );
        }
        session.close();
        tokio::time::sleep(backoff.next_delay()).await;
    }
}
