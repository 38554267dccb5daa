//! # spindl
//!
//! Command-line driver: resolve a track, walk it through preparation and
//! materialization, and print the download link.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use spindl_api::BackendClient;
use spindl_core::Phase;
use spindl_session::{Command, HostConfig, NoticeLevel, SessionHandle, SessionHost, Update};

/// How long to wait for the failure notice trailing a failed phase.
const NOTICE_GRACE: Duration = Duration::from_millis(250);

/// Queue a track for download and print the link.
#[derive(Parser, Debug)]
#[command(
    name = "spindl",
    about = "Queue a track for download and print the link",
    version
)]
struct Cli {
    /// Track page URL (or bare track id) to download.
    url: String,

    /// Job-control API base URL (overrides settings).
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for the job-control API (overrides settings).
    #[arg(long)]
    token: Option<String>,

    /// Broker WebSocket URL (overrides settings).
    #[arg(long)]
    socket_url: Option<String>,

    /// Settings file (default: `~/.spindl/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Give up when no link arrived within this many seconds (0 waits forever).
    #[arg(long, default_value = "0")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Progress goes to stderr; stdout carries only the final link.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spindl=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = args.settings.clone().unwrap_or_else(settings::settings_path);
    let mut settings =
        settings::load_settings_from_path(&path).context("failed to load settings")?;
    if let Some(url) = args.api_url {
        settings.api.base_url = url;
    }
    if let Some(token) = args.token {
        settings.api.auth_token = Some(token);
    }
    if let Some(url) = args.socket_url {
        settings.socket.url = url;
    }

    let api = Arc::new(BackendClient::new(
        settings.api.base_url.clone(),
        settings.api.auth_token.clone(),
    ));
    let config = HostConfig {
        socket_url: settings.socket.url.clone(),
        app_key: settings.socket.app_key.clone(),
        reconnect: settings.reconnect.policy(),
    };
    let mut handle = SessionHost::spawn(api, config);

    info!(url = args.url, "starting download session");
    if !handle.command(Command::StartLookup { url: args.url }).await {
        bail!("session host did not start");
    }

    if args.timeout_secs == 0 {
        drive(&mut handle).await
    } else {
        match tokio::time::timeout(Duration::from_secs(args.timeout_secs), drive(&mut handle))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                handle.shutdown();
                bail!("no download link after {} seconds", args.timeout_secs);
            }
        }
    }
}

/// Pump session updates, auto-advancing the flow, until the link prints or
/// the attempt fails.
async fn drive(handle: &mut SessionHandle) -> Result<()> {
    let mut driven: Option<Phase> = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("interrupted");
                handle.shutdown();
                return Ok(());
            }
            update = handle.next_update() => {
                let Some(update) = update else {
                    bail!("session host stopped unexpectedly");
                };
                match update {
                    Update::State(session) => {
                        let entered = driven != Some(session.phase);
                        driven = Some(session.phase);
                        match session.phase {
                            Phase::ResultShown if entered => {
                                if let Some(track) = &session.track {
                                    info!("{}", track.summary());
                                }
                                let _ = handle.command(Command::StartPreparation).await;
                            }
                            Phase::Queued => {
                                info!(position = session.queue_position, "waiting in queue");
                            }
                            Phase::PreparationReady if entered => {
                                let _ = handle.command(Command::StartMaterialization).await;
                            }
                            Phase::Downloading => {
                                if let Some(message) = &session.last_message {
                                    info!("{message}");
                                }
                            }
                            Phase::ReadyToDownload if entered => {
                                let _ = handle.command(Command::Download).await;
                            }
                            Phase::Failed if entered => {
                                // The failure notice trails the phase change.
                                if let Ok(Some(Update::Notice(notice))) =
                                    tokio::time::timeout(NOTICE_GRACE, handle.next_update()).await
                                {
                                    warn!("{}", notice.message);
                                }
                                handle.shutdown();
                                bail!("download failed");
                            }
                            _ => {}
                        }
                    }
                    Update::Notice(notice) => match notice.level {
                        NoticeLevel::Success => info!("{}", notice.message),
                        NoticeLevel::Error => warn!("{}", notice.message),
                    },
                    Update::Download { url } => {
                        println!("{url}");
                        handle.shutdown();
                        return Ok(());
                    }
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_requires_a_url() {
        let result = Cli::try_parse_from(["spindl"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_minimal_invocation() {
        let cli = Cli::parse_from(["spindl", "https://open.spotify.com/track/x"]);
        assert_eq!(cli.url, "https://open.spotify.com/track/x");
        assert_eq!(cli.timeout_secs, 0);
        assert!(cli.api_url.is_none());
        assert!(cli.token.is_none());
        assert!(cli.settings.is_none());
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "spindl",
            "--api-url",
            "https://dl.example.com/api",
            "--token",
            "s3cret",
            "--socket-url",
            "ws://broker.example.com",
            "--timeout-secs",
            "90",
            "track-id",
        ]);
        assert_eq!(cli.api_url.as_deref(), Some("https://dl.example.com/api"));
        assert_eq!(cli.token.as_deref(), Some("s3cret"));
        assert_eq!(cli.socket_url.as_deref(), Some("ws://broker.example.com"));
        assert_eq!(cli.timeout_secs, 90);
        assert_eq!(cli.url, "track-id");
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["spindl", "--settings", "/tmp/s.json", "u"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
    }
}
