//! # feedline
//!
//! Tails one or more event feeds and prints every update as a JSON line.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use feedline_client::{ChannelSubscriber, FeedUpdate, Registry};
use feedline_core::Identity;
use feedline_settings::FeedlineSettings;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

/// Real-time event feed client.
#[derive(Parser, Debug)]
#[command(name = "feedline", about = "Real-time event feed client")]
struct Cli {
    /// Settings file (defaults to `~/.feedline/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every update for the given identities until interrupted.
    Tail {
        /// Feeds to follow.
        #[arg(required = true)]
        identities: Vec<String>,

        /// Force long-polling even when streaming is available.
        #[arg(long)]
        poll: bool,

        /// Reopen the stream after it fails.
        #[arg(long)]
        reconnect: bool,
    },
}

fn load(cli: &Cli) -> Result<FeedlineSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(feedline_settings::settings_path);
    let mut settings =
        feedline_settings::load_settings_from_path(&path).context("Failed to load settings")?;
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

/// One output line for an update.
fn render(identity: &Identity, update: &FeedUpdate, at: DateTime<Utc>) -> Value {
    let at = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    match update {
        FeedUpdate::Connected(handshake) => json!({
            "at": at,
            "identity": identity,
            "kind": "connected",
            "cursor": handshake.cursor,
        }),
        FeedUpdate::Event { name, data } => json!({
            "at": at,
            "identity": identity,
            "kind": "event",
            "name": name,
            "data": data,
        }),
        FeedUpdate::Error(error) => json!({
            "at": at,
            "identity": identity,
            "kind": "error",
            "error": error.to_string(),
        }),
    }
}

async fn tail(
    mut settings: FeedlineSettings,
    identities: Vec<String>,
    poll: bool,
    reconnect: bool,
) -> Result<()> {
    if poll {
        settings.transport.prefer_streaming = false;
    }
    if reconnect {
        settings.transport.stream_reconnect = true;
    }
    let registry = Registry::from_settings(&settings).context("Failed to build HTTP client")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(Identity, FeedUpdate)>();
    let mut handles = Vec::with_capacity(identities.len());
    for raw in identities {
        let identity = Identity::from(raw);
        let (subscriber, mut updates) = ChannelSubscriber::new();
        handles.push(registry.subscribe(identity.clone(), Arc::new(subscriber)));
        let tx = tx.clone();
        let _ = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if tx.send((identity.clone(), update)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);
    info!(feeds = handles.len(), base_url = %settings.api.base_url, "tailing");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
            next = rx.recv() => {
                let Some((identity, update)) = next else { break };
                println!("{}", render(&identity, &update, Utc::now()));
            }
        }
    }

    for handle in &handles {
        handle.close();
    }
    registry.shutdown();
    info!("stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    if settings.logging.json {
        feedline_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        feedline_core::logging::init_subscriber(&settings.logging.level);
    }

    match cli.command {
        Command::Tail {
            identities,
            poll,
            reconnect,
        } => tail(settings, identities, poll, reconnect).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use feedline_client::TransportError;
    use feedline_core::Handshake;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_tail_arguments() {
        let cli = Cli::try_parse_from([
            "feedline",
            "tail",
            "P1",
            "P2",
            "--poll",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Tail {
                identities,
                poll,
                reconnect,
            } => {
                assert_eq!(identities, vec!["P1", "P2"]);
                assert!(poll);
                assert!(!reconnect);
            }
        }
    }

    #[test]
    fn tail_requires_an_identity() {
        assert!(Cli::try_parse_from(["feedline", "tail"]).is_err());
    }

    #[test]
    fn renders_each_update_kind() {
        let id = Identity::from("P1");

        let line = render(
            &id,
            &FeedUpdate::Connected(Handshake {
                identity: id.clone(),
                cursor: Some(3),
                server_session_id: None,
            }),
            at(),
        );
        assert_eq!(line["kind"], "connected");
        assert_eq!(line["cursor"], 3);
        assert_eq!(line["at"], "2026-10-01T12:00:00.000Z");

        let line = render(
            &id,
            &FeedUpdate::Event {
                name: "message".into(),
                data: json!({"text": "hi"}),
            },
            at(),
        );
        assert_eq!(line["identity"], "P1");
        assert_eq!(line["name"], "message");
        assert_eq!(line["data"]["text"], "hi");

        let line = render(&id, &FeedUpdate::Error(TransportError::StreamClosed), at());
        assert_eq!(line["kind"], "error");
        assert_eq!(line["error"], "event stream closed by server");
    }

    #[test]
    fn log_level_flag_overrides_settings() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "feedline",
            "--config",
            dir.path().join("missing.json").to_str().unwrap(),
            "--log-level",
            "trace",
            "tail",
            "P1",
        ])
        .unwrap();
        let settings = load(&cli).unwrap();
        assert_eq!(settings.logging.level, "trace");
    }

    #[test]
    fn malformed_config_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{").unwrap();
        let cli =
            Cli::try_parse_from(["feedline", "--config", path.to_str().unwrap(), "tail", "P1"])
                .unwrap();
        let err = load(&cli).unwrap_err();
        assert!(format!("{err:#}").contains(path.to_str().unwrap()));
    }
}
