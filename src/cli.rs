use crate::engine::{EngineControl, FetchEngine};
use crate::logger::SessionLogger;
use crate::model::{gen_session_id, RunConfig, RunEvent};
use crate::orchestrator::{drive, RunnerCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "installer-fetch",
    version,
    about = "Fetch a full OS installer with live progress parsing and a session log"
)]
pub struct Cli {
    /// Installer version handed to the fetch command
    #[arg(long, default_value = "15.3.1")]
    pub installer_version: String,

    /// Program to execute
    #[arg(long, default_value = "softwareupdate")]
    pub command: String,

    /// Argument passed to the program; repeat for several. When given, the
    /// default fetch-full-installer argument list is replaced entirely
    #[arg(long = "command-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub command_args: Vec<String>,

    /// Session log file (defaults to a timestamped file under the temp dir)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the final run summary as JSON and exit (no live feed)
    #[arg(long)]
    pub json: bool,

    /// Use --fetch-on-launch false to start idle and wait for commands
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub fetch_on_launch: bool,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json {
        return run_json(args).await;
    }
    run_text(args).await
}

/// Default session log location, one file per session.
fn default_log_path() -> PathBuf {
    let stamp = time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .format(time::macros::format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "unknown".into());
    std::env::temp_dir()
        .join("installer-fetch")
        .join(format!("installer_fetch_{stamp}.log"))
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    let command_args = if args.command_args.is_empty() {
        vec![
            "--fetch-full-installer".to_string(),
            "--full-installer-version".to_string(),
            args.installer_version.clone(),
        ]
    } else {
        args.command_args.clone()
    };
    RunConfig {
        program: args.command.clone(),
        args: command_args,
        session_id: gen_session_id(),
        log_path: args.log_file.clone().unwrap_or_else(default_log_path),
    }
}

/// Drive the engine directly and print the final summary as JSON on stdout.
/// The event feed is not rendered in this mode.
async fn run_json(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();

    let (evt_tx, _) = mpsc::unbounded_channel::<RunEvent>();
    let (_, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let logger = SessionLogger::new(cfg.log_path.clone());
    let engine = FetchEngine::new(cfg, logger);
    let summary = engine
        .run(evt_tx, ctrl_rx)
        .await
        .context("installer fetch failed")?;

    let out = serde_json::to_string_pretty(&summary)?;
    let _ = out_tx.send(OutputLine::Stdout(out));

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Live text mode: raw command output on stdout, derived status on stderr.
/// Ctrl-C cancels the active fetch, waits for it to resolve, then exits.
async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<RunnerCommand>();

    let controller_handle = tokio::spawn(drive(cfg, evt_tx, cmd_rx, args.fetch_on_launch));

    let ctrlc_tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrlc_tx.send(RunnerCommand::Quit);
        }
    });

    let mut exit_err: Option<anyhow::Error> = None;
    while let Some(ev) = evt_rx.recv().await {
        match ev {
            RunEvent::Line { text } => {
                let _ = out_tx.send(OutputLine::Stdout(text));
            }
            RunEvent::Progress { percent } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Downloading: {percent}%")));
            }
            RunEvent::PhaseChanged { message, .. } => {
                let _ = out_tx.send(OutputLine::Stderr(message));
            }
            RunEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
            RunEvent::Completed { summary } => {
                let _ = out_tx.send(OutputLine::Stderr("Download completed!".to_string()));
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Session log: {}",
                    summary.log_path.display()
                )));
                break;
            }
            RunEvent::Failed { message } => {
                // The message reaches the terminal through the returned error;
                // printing it here as well would show it twice.
                exit_err = Some(anyhow::anyhow!(message));
                break;
            }
        }
    }

    let _ = cmd_tx.send(RunnerCommand::Quit);
    controller_handle.await.context("controller task failed")??;

    drop(out_tx);
    let _ = out_handle.await;

    match exit_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
