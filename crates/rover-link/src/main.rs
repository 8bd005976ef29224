//! Rover-Link operator client: entry point.
//!
//! Connects to the signaling relay, keeps the session alive, sends control
//! commands typed on stdin, and logs the smoothed vehicle state.
//!
//! # Usage
//!
//! ```text
//! rover-link [OPTIONS]
//!
//! Options:
//!   -c, --config        <PATH>  TOML config file [default: rover-link.toml]
//!       --signaling-url <URL>   WebSocket URL of the signaling relay
//!       --channel-id    <ID>    Relay channel id
//!       --ctrl-label    <LABEL> Control channel label
//!       --state-label   <LABEL> State channel label
//!   -v, --verbose               Force debug logging
//! ```
//!
//! Each stdin line is sent as one control command: a preset name (`UP`,
//! `DOWN`, `LEFT`, `RIGHT`, `IDLE`, any case), a JSON object
//! (`{"command":"UP","speed":0.5}`), any other JSON value, or plain text.
//!
//! # Environment variable overrides
//!
//! | Variable              | Overrides              |
//! |-----------------------|------------------------|
//! | `ROVER_CONFIG`        | `--config`             |
//! | `ROVER_SIGNALING_URL` | `link.signaling_url`   |
//! | `ROVER_CHANNEL_ID`    | `link.channel_id`      |
//! | `ROVER_CTRL_LABEL`    | `link.ctrl_label`      |
//! | `ROVER_STATE_LABEL`   | `link.state_label`     |
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! # Architecture overview
//!
//! ```text
//! stdin ──► RoverClient ──► ConnectionManager ──► WsTransport ──► relay ──► vehicle
//!                │                  │
//!                │          DataChannelManager
//!                ▼
//!          EventHub ──► StateReceiver ──► trace!/debug! frame + status logs
//! ```

use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rover_core::ControlCommand;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Interval;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use rover_link::domain::config::normalize_label;
use rover_link::domain::config::{DEFAULT_CTRL_LABEL, DEFAULT_STATE_LABEL};
use rover_link::infrastructure::{WsTransport, WsTransportConfig};
use rover_link::{ClientEvent, LinkConfig, RoverClient, StateReceiver};

/// Command names the vehicle understands without further fields.
const PRESET_COMMANDS: [&str; 5] = ["UP", "DOWN", "LEFT", "RIGHT", "IDLE"];

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Rover-Link operator client.
#[derive(Debug, Parser)]
#[command(
    name = "rover-link",
    about = "Resilient data-channel client for driving a remote vehicle",
    version
)]
struct Cli {
    /// Path to the TOML config file.  A missing file means "all defaults".
    #[arg(short, long, default_value = "rover-link.toml", env = "ROVER_CONFIG")]
    config: PathBuf,

    /// WebSocket URL of the signaling relay.
    #[arg(long, env = "ROVER_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Relay channel id.
    #[arg(long, env = "ROVER_CHANNEL_ID")]
    channel_id: Option<String>,

    /// Control channel label; a leading `#` is added if missing.
    #[arg(long, env = "ROVER_CTRL_LABEL")]
    ctrl_label: Option<String>,

    /// State channel label; a leading `#` is added if missing.
    #[arg(long, env = "ROVER_STATE_LABEL")]
    state_label: Option<String>,

    /// Force `debug` logging regardless of `RUST_LOG` and `log.level`.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Loads the config file and applies CLI/env overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if the merged
    /// values fail validation, or if no signaling URL is configured.
    fn into_link_config(self) -> anyhow::Result<LinkConfig> {
        let mut config = LinkConfig::load(&self.config)
            .with_context(|| format!("failed to load config from {}", self.config.display()))?;

        if let Some(url) = self.signaling_url {
            config.link.signaling_url = url;
        }
        if let Some(channel_id) = self.channel_id {
            config.link.channel_id = channel_id;
        }
        if let Some(label) = self.ctrl_label {
            config.link.ctrl_label = normalize_label(&label, DEFAULT_CTRL_LABEL);
        }
        if let Some(label) = self.state_label {
            config.link.state_label = normalize_label(&label, DEFAULT_STATE_LABEL);
        }

        config.validate().context("invalid configuration")?;
        if config.link.signaling_url.trim().is_empty() {
            anyhow::bail!(
                "no signaling URL configured: pass --signaling-url, set ROVER_SIGNALING_URL, \
                 or set link.signaling_url in the config file"
            );
        }
        Ok(config)
    }
}

/// Turns one stdin line into a control command.  Blank lines yield `None`.
fn parse_command(line: &str) -> Option<ControlCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some(preset) = PRESET_COMMANDS
        .iter()
        .find(|p| p.eq_ignore_ascii_case(line))
    {
        return Some(ControlCommand::from(*preset));
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Some(ControlCommand::from(value)),
        Err(_) => Some(ControlCommand::from(line)),
    }
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    let config = cli.into_link_config()?;
    init_tracing(&config.log.level, verbose);

    info!(
        url = %config.link.signaling_url,
        channel_id = %config.link.channel_id,
        ctrl = %config.link.ctrl_label,
        state = %config.link.state_label,
        "rover-link starting"
    );

    // ── Client and receiver ───────────────────────────────────────────────────
    let transport = Arc::new(WsTransport::new(WsTransportConfig::from_link_config(
        &config,
    )));
    let client = RoverClient::new(transport, &config);

    client.subscribe("state-changed", |ev: &ClientEvent| {
        if let ClientEvent::StateChanged(state) = ev {
            info!(%state, "connection state");
        }
    });
    client.subscribe("channel-open", |ev: &ClientEvent| info!(?ev, "channel open"));
    client.subscribe("channel-close", |ev: &ClientEvent| info!(?ev, "channel closed"));
    client.subscribe("reconnecting", |ev: &ClientEvent| {
        if let ClientEvent::Reconnecting { attempt, delay } = ev {
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        }
    });
    client.subscribe("error", |ev: &ClientEvent| {
        if let ClientEvent::Error(message) = ev {
            warn!(%message, "client error");
        }
    });

    let receiver = StateReceiver::new(client.events().clone(), &config);
    receiver.on_state(|rendered| {
        trace!(
            seq = rendered.raw.seq,
            x = rendered.frame.pose.x,
            y = rendered.frame.pose.y,
            heading = rendered.frame.pose.heading,
            extrapolated = rendered.flags.extrapolated,
            "frame"
        );
    });
    receiver.on_status(|status| {
        debug!(
            state = ?status.state,
            buffer = status.buffer_len,
            hb_age_ms = ?status.hb_age_ms,
            offset_ms = ?status.clock_offset_ms,
            "receiver status"
        );
    });

    receiver.start();
    client.start();

    // ── Main loop: stdin commands, heartbeats, Ctrl+C ─────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut heartbeat = config.link.heartbeat_interval().map(tokio::time::interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("failed to listen for Ctrl+C signal: {e}");
                }
                info!("received Ctrl+C; shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some(command) = parse_command(&line) {
                        if !client.send_ctrl(command) {
                            warn!(command = %line.trim(), "control channel not ready; command dropped");
                        }
                    }
                }
                Ok(None) => {
                    debug!("stdin closed; no more commands");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("failed to read stdin: {e}");
                    stdin_open = false;
                }
            },
            _ = next_heartbeat(&mut heartbeat) => {
                if client.is_ctrl_ready() {
                    client.send_heartbeat();
                }
            }
        }
    }

    receiver.stop();
    client.shutdown().await;
    info!("rover-link stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
