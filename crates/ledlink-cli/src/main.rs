//! LED Link Control Tool
//!
//! CLI for driving an LED strip daemon over the USB serial link.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledlink_core::{Command, ConnectionState, LinkConfig, LinkEvent, LinkWorker, SerialConnector};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ledlinkctl")]
#[command(about = "Control tool for LED strips on a serial link")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Link configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port (e.g. /dev/ttyACM0 or COM6)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Seconds to wait for the device to answer
    #[arg(long, default_value = "5")]
    wait: u64,

    /// Print link events as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set a solid color
    Color {
        #[arg(allow_negative_numbers = true)]
        red: i64,
        #[arg(allow_negative_numbers = true)]
        green: i64,
        #[arg(allow_negative_numbers = true)]
        blue: i64,
    },
    /// Set brightness (0-255)
    Brightness {
        #[arg(allow_negative_numbers = true)]
        level: i64,
    },
    /// Start an effect
    Effect {
        /// Effect: solid, rainbow, grouped, breathing, test
        name: String,

        /// Effect parameters (0-255 each)
        #[arg(allow_negative_numbers = true)]
        params: Vec<i64>,
    },
    /// Turn the strip off
    Off,
    /// Show current strip state
    Status,
    /// Print link events and send commands typed on stdin
    /// (COLOR:r,g,b  BRIGHTNESS:n  EFFECT:name[,p..]  TEST  OFF  STATUS)
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .init();

    let config = link_config(cli.config.as_deref(), cli.port, cli.baud)?;

    match intent(cli.command)? {
        Some(command) => {
            handle_command(config, command, Duration::from_secs(cli.wait), cli.json).await
        }
        None => handle_watch(config, cli.json).await,
    }
}

/// `--verbose` wins; otherwise `RUST_LOG`, falling back to warnings only.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Builds the link configuration from an optional file plus overrides.
fn link_config(path: Option<&Path>, port: Option<String>, baud: Option<u32>) -> Result<LinkConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse link configuration")?
        }
        None => LinkConfig::default(),
    };
    if let Some(port) = port {
        config.endpoint = port;
    }
    if let Some(baud) = baud {
        config.baud_rate = baud;
    }
    Ok(config)
}

/// Validates the arguments into a command. `None` means watch mode.
fn intent(command: Commands) -> Result<Option<Command>> {
    let command = match command {
        Commands::Color { red, green, blue } => Command::set_color(red, green, blue)?,
        Commands::Brightness { level } => Command::set_brightness(level)?,
        Commands::Effect { name, params } => Command::set_effect_wide(name.parse()?, &params)?,
        Commands::Off => Command::PowerOff,
        Commands::Status => Command::QueryStatus,
        Commands::Watch => return Ok(None),
    };
    Ok(Some(command))
}

/// True when `event` is the device's answer to `command`.
fn is_reply_to(command: &Command, event: &LinkEvent) -> bool {
    let opcode = command.opcode() as u8;
    match event {
        LinkEvent::Ack { opcode: acked } => *acked == opcode,
        LinkEvent::Nack {
            opcode: rejected, ..
        } => *rejected == opcode,
        LinkEvent::Status(_) => matches!(command, Command::QueryStatus),
        LinkEvent::StateChanged { .. } => false,
    }
}

async fn next_event<F>(events: &mut broadcast::Receiver<LinkEvent>, mut wanted: F) -> Result<LinkEvent>
where
    F: FnMut(&LinkEvent) -> bool,
{
    loop {
        match events.recv().await {
            Ok(event) if wanted(&event) => return Ok(event),
            Ok(event) => debug!("Skipping {}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => anyhow::bail!("Link worker stopped"),
        }
    }
}

async fn handle_command(
    config: LinkConfig,
    command: Command,
    wait: Duration,
    json: bool,
) -> Result<()> {
    let endpoint = config.endpoint.clone();
    let (worker, handle) = LinkWorker::new(SerialConnector::new(config.baud_rate), config);
    let mut events = handle.subscribe();
    let task = tokio::spawn(worker.run());

    let exchange = async {
        next_event(&mut events, |event| {
            matches!(
                event,
                LinkEvent::StateChanged {
                    to: ConnectionState::Connected,
                    ..
                }
            )
        })
        .await?;
        handle.submit(command.clone()).await?;
        next_event(&mut events, |event| is_reply_to(&command, event)).await
    };
    let outcome = tokio::time::timeout(wait, exchange).await;

    let _ = handle.shutdown().await;
    let _ = task.await;

    let event = outcome
        .map_err(|_| anyhow::anyhow!("No answer from {} within {:?}", endpoint, wait))??;
    report(&command, &event, json)
}

fn report(command: &Command, event: &LinkEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    }
    match event {
        LinkEvent::Nack { reason, .. } => {
            anyhow::bail!("Device rejected {}: {}", command, reason);
        }
        LinkEvent::Status(status) if !json => {
            println!("Strip Status:");
            println!("  Power: {}", if status.powered { "on" } else { "off" });
            println!("  Color: {}", status.color);
            println!("  Brightness: {}", status.brightness);
            println!("  Effect: {}", status.effect);
        }
        _ if !json => println!("Sent: {}", command),
        _ => {}
    }
    Ok(())
}

fn print_event(event: &LinkEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", event);
    }
    Ok(())
}

async fn handle_watch(config: LinkConfig, json: bool) -> Result<()> {
    let (worker, handle) = LinkWorker::new(SerialConnector::new(config.baud_rate), config);
    let mut events = handle.subscribe();
    let task = tokio::spawn(worker.run());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(broadcast::error::RecvError::Lagged(n)) => eprintln!("({} events skipped)", n),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<Command>() {
                    Ok(command) => handle.submit(command).await?,
                    Err(e) => eprintln!("Invalid command '{}': {}", line.trim(), e),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = handle.shutdown().await;
    let _ = task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledlink_core::{NackReason, StripStatus};

    #[test]
    fn test_log_filter_honours_rust_log() {
        std::env::set_var("RUST_LOG", "ledlink_core=trace");
        assert!(log_filter(false).to_string().contains("ledlink_core=trace"));
        assert_eq!(log_filter(true).to_string(), "debug");

        std::env::remove_var("RUST_LOG");
        assert_eq!(log_filter(false).to_string(), "warn");
    }

    #[test]
    fn test_link_config_overrides() {
        let config = link_config(None, Some("COM6".to_string()), Some(9600)).unwrap();
        assert_eq!(config.endpoint, "COM6");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(link_config(Some(Path::new("/nonexistent/ledlink.toml")), None, None).is_err());
    }

    #[test]
    fn test_intent_validates_without_clamping() {
        assert!(intent(Commands::Color {
            red: 300,
            green: 0,
            blue: 0
        })
        .is_err());
        assert!(intent(Commands::Brightness { level: -1 }).is_err());
        assert_eq!(
            intent(Commands::Brightness { level: 255 }).unwrap(),
            Some(Command::SetBrightness(255))
        );
        assert!(intent(Commands::Effect {
            name: "sparkle".to_string(),
            params: vec![]
        })
        .is_err());
        assert!(intent(Commands::Watch).unwrap().is_none());
    }

    #[test]
    fn test_is_reply_to() {
        let color = Command::set_color(1, 2, 3).unwrap();
        assert!(is_reply_to(&color, &LinkEvent::Ack { opcode: 0x01 }));
        assert!(!is_reply_to(&color, &LinkEvent::Ack { opcode: 0x02 }));
        assert!(is_reply_to(
            &color,
            &LinkEvent::Nack {
                opcode: 0x01,
                reason: NackReason::DeviceFault
            }
        ));
        assert!(!is_reply_to(
            &color,
            &LinkEvent::Status(StripStatus::default())
        ));
        assert!(is_reply_to(
            &Command::QueryStatus,
            &LinkEvent::Status(StripStatus::default())
        ));
    }
}
