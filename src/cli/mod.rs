//! Command-line interface for cypher.
//!
//! Provides commands for running a live investigation, replaying a
//! captured notification transcript, probing the backend and showing the
//! resolved configuration.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use crate::adapters::{probe, SocketIoChannel};
use crate::config::{self, ResolvedConfig, BACKEND_URL_ENV};
use crate::core::{InvestigationAggregator, InvestigationSession, StartOutcome};
use crate::domain::{InvestigationRequest, RecordedNotification, RunSnapshot, RunStatus};
use crate::render::{self, AWAITING_PLACEHOLDER};

/// Indicator used when none is given
pub const DEFAULT_INDICATOR: &str = "8.8.4.4";

/// Log line submitted when no log source is given
pub const SAMPLE_LOGS: &str =
    "[2023-10-27 10:00:04] CMD: User 'admin' executed 'cat /etc/passwd'.";

/// cypher - Live client for security investigation workflows
#[derive(Parser, Debug)]
#[command(name = "cypher")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides config file)
    #[arg(long, global = true, env = BACKEND_URL_ENV)]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an investigation and stream its steps
    Investigate {
        /// Indicator to investigate (IP, URL, hash, ...)
        #[arg(short, long, default_value = DEFAULT_INDICATOR)]
        indicator: String,

        /// Log content to submit (a sample line if no source is given)
        #[arg(short, long, conflicts_with_all = ["logs_file", "stdin"])]
        logs: Option<String>,

        /// Read log content from a file
        #[arg(long, conflicts_with = "stdin")]
        logs_file: Option<PathBuf>,

        /// Read log content from stdin
        #[arg(long)]
        stdin: bool,

        /// Print the final snapshot as JSON instead of the live trace
        #[arg(long)]
        json: bool,
    },

    /// Replay a newline-delimited JSON transcript of notifications
    Replay {
        /// Transcript file (one {"event": ..., "data": ...} per line)
        path: PathBuf,

        /// Print the resulting snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that a Socket.IO backend answers the handshake
    Ping,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = resolved_config(self.backend.as_deref())?;

        match self.command {
            Commands::Investigate {
                indicator,
                logs,
                logs_file,
                stdin,
                json,
            } => {
                let logs = read_logs(logs, logs_file, stdin)?;
                investigate(&config, InvestigationRequest::new(indicator, logs), json).await
            }
            Commands::Replay { path, json } => replay(&path, json),
            Commands::Ping => ping(&config).await,
            Commands::Config => show_config(&config),
        }
    }
}

fn resolved_config(backend: Option<&str>) -> Result<ResolvedConfig> {
    let config = config::config()?.clone();
    match backend {
        Some(url) => config.with_backend(url),
        None => Ok(config),
    }
}

/// Pick log content from flag, file or stdin
fn read_logs(logs: Option<String>, logs_file: Option<PathBuf>, use_stdin: bool) -> Result<String> {
    if let Some(logs) = logs {
        return Ok(logs);
    }

    if let Some(path) = logs_file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read logs file: {}", path.display()));
    }

    if use_stdin {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        return Ok(buffer);
    }

    Ok(SAMPLE_LOGS.to_string())
}

/// Run one investigation against the backend
async fn investigate(config: &ResolvedConfig, request: InvestigationRequest, json: bool) -> Result<()> {
    let (channel, events) = SocketIoChannel::connect(config.channel_settings())?;
    let mut session = InvestigationSession::new(channel, events);

    let connected = tokio::time::timeout(config.connect_timeout(), session.wait_connected())
        .await
        .unwrap_or(false);
    if !connected {
        session.close().await;
        anyhow::bail!("Could not connect to backend at {}", config.backend_url);
    }

    match session.start(&request).await {
        Ok(StartOutcome::Sent) => {}
        Ok(outcome) => {
            session.close().await;
            anyhow::bail!("Investigation was not started: {:?}", outcome);
        }
        Err(e) => {
            session.close().await;
            return Err(e).context("Failed to send investigation request");
        }
    }

    let spinner = (!json).then(awaiting_spinner);
    let mut printed = 0;
    let mut generation = 0;

    let outcome = tokio::select! {
        outcome = session.run_until_settled(|_, snapshot| {
            if snapshot.generation != generation {
                generation = snapshot.generation;
                printed = 0;
            }
            if let Some(pb) = &spinner {
                for step in snapshot.steps.iter().skip(printed) {
                    pb.println(render::render_step(step));
                }
            }
            printed = snapshot.steps.len();
        }) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            None
        }
    };

    if let Some(pb) = &spinner {
        pb.finish_and_clear();
    }
    session.close().await;

    let snapshot = outcome.context("Session ended before the investigation completed")?;
    report(&snapshot, json)
}

fn awaiting_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.yellow} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(AWAITING_PLACEHOLDER);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Print the outcome of a settled run
fn report(snapshot: &RunSnapshot, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
        println!("{}", out);
    } else if let Some(result) = &snapshot.final_result {
        println!("\n{}", render::render_final(result));
    }

    match snapshot.status {
        RunStatus::Finished => {
            eprintln!(
                "\n[Investigation completed: {} steps]",
                snapshot.steps.len()
            );
            Ok(())
        }
        RunStatus::Errored => {
            eprintln!(
                "\n[Investigation failed: {}]",
                snapshot.error.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
        RunStatus::Streaming => {
            anyhow::bail!("Connection lost after {} steps", snapshot.steps.len())
        }
        RunStatus::Idle => anyhow::bail!("Backend never acknowledged the investigation"),
    }
}

/// Feed a transcript through the aggregator and render the result
fn replay(path: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript: {}", path.display()))?;

    let mut aggregator = InvestigationAggregator::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let recorded: RecordedNotification = serde_json::from_str(line)
            .with_context(|| format!("Failed to parse line {}: {}", line_no + 1, line))?;
        let event = recorded.event.clone();

        match recorded.into_notification() {
            Some(notification) => {
                let disposition = aggregator.apply(notification);
                debug!(line = line_no + 1, %event, ?disposition, "Replayed");
            }
            None => debug!(line = line_no + 1, %event, "Skipping unknown event"),
        }
    }

    let snapshot = aggregator.snapshot();
    if json {
        let out = serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?;
        println!("{}", out);
    } else {
        print!("{}", render::render_snapshot(&snapshot));
        eprintln!("\n[Status: {}]", snapshot.status);
    }

    Ok(())
}

/// Probe the backend with the polling handshake
async fn ping(config: &ResolvedConfig) -> Result<()> {
    let handshake = probe(&config.channel_settings())
        .await
        .with_context(|| format!("Backend at {} did not answer", config.backend_url))?;

    println!("Backend: {}", config.backend_url);
    println!("Session ID: {}", handshake.sid);
    println!("Ping interval: {} ms", handshake.ping_interval);
    println!("Ping timeout: {} ms", handshake.ping_timeout);
    println!(
        "Upgrades: {}",
        if handshake.upgrades.is_empty() {
            "none".to_string()
        } else {
            handshake.upgrades.join(", ")
        }
    );

    Ok(())
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("Backend: {}", config.backend_url);
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!(
        "Reconnect: {} ms initial, {} ms max",
        config.channel.reconnect_initial_ms, config.channel.reconnect_max_ms
    );
    println!("Connect timeout: {} s", config.channel.connect_timeout_seconds);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_investigate() {
        let cli = Cli::try_parse_from([
            "cypher",
            "investigate",
            "--indicator",
            "8.8.4.4",
            "--logs",
            "cat /etc/passwd",
        ])
        .unwrap();

        match cli.command {
            Commands::Investigate {
                indicator, logs, json, ..
            } => {
                assert_eq!(indicator, "8.8.4.4");
                assert_eq!(logs.as_deref(), Some("cat /etc/passwd"));
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_investigate_defaults() {
        let cli = Cli::try_parse_from(["cypher", "investigate"]).unwrap();

        match cli.command {
            Commands::Investigate {
                indicator,
                logs,
                logs_file,
                stdin,
                ..
            } => {
                assert_eq!(indicator, DEFAULT_INDICATOR);
                assert!(logs.is_none());
                assert!(logs_file.is_none());
                assert!(!stdin);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_logs_sources_conflict() {
        let result = Cli::try_parse_from([
            "cypher",
            "investigate",
            "-i",
            "1.1.1.1",
            "--logs",
            "x",
            "--stdin",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_logs_prefers_flag() {
        let logs = read_logs(Some("inline".to_string()), None, false).unwrap();
        assert_eq!(logs, "inline");
        assert_eq!(read_logs(None, None, false).unwrap(), SAMPLE_LOGS);
    }

    #[test]
    fn test_read_logs_from_file() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "sshd: Failed password for root").unwrap();

        let logs = read_logs(None, Some(temp.path().to_path_buf()), false).unwrap();
        assert_eq!(logs, "sshd: Failed password for root");
    }

    #[test]
    fn test_replay_transcript() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            concat!(
                "{\"event\":\"investigation_started\"}\n",
                "\n",
                "{\"event\":\"graph_event\",\"data\":{\"supervisor\":{\"next_node\":\"Threat_Analyst\"}}}\n",
                "{\"event\":\"graph_finished\"}\n",
            ),
        )
        .unwrap();

        assert!(replay(temp.path(), true).is_ok());
    }

    #[test]
    fn test_replay_rejects_bad_line() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "not json\n").unwrap();

        let err = replay(temp.path(), false).unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }
}
