//! Engine-level tests driving real child processes through `/bin/sh`.
//!
//! Each script stands in for the fetch command and prints a controlled
//! output sequence; the assertions cover event ordering, session guards,
//! terminal outcomes, and the session log on disk.
#![cfg(unix)]

use installer_fetch_cli::engine::{EngineControl, FetchEngine};
use installer_fetch_cli::error::RunError;
use installer_fetch_cli::logger::SessionLogger;
use installer_fetch_cli::model::{Phase, RunConfig, RunEvent, RunSummary};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn sh_config(script: &str, dir: &TempDir) -> RunConfig {
    RunConfig {
        program: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        session_id: "test-session".to_string(),
        log_path: dir.path().join("session.log"),
    }
}

/// Run the engine to completion with no cancellation and collect every event.
async fn run_engine(cfg: RunConfig) -> (Result<RunSummary, RunError>, Vec<RunEvent>) {
    let logger = SessionLogger::new(cfg.log_path.clone());
    let engine = FetchEngine::new(cfg, logger);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (_ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

    let outcome = tokio::time::timeout(Duration::from_secs(10), engine.run(evt_tx, ctrl_rx))
        .await
        .expect("engine run timed out");

    let mut events = Vec::new();
    while let Ok(ev) = evt_rx.try_recv() {
        events.push(ev);
    }
    (outcome, events)
}

fn progress_values(events: &[RunEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|ev| match ev {
            RunEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn phase_values(events: &[RunEvent]) -> Vec<Phase> {
    events
        .iter()
        .filter_map(|ev| match ev {
            RunEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn read_log(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("session.log"))
        .expect("session log missing")
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[tokio::test]
async fn progress_is_strictly_increasing_and_deduplicated() {
    let dir = TempDir::new().unwrap();
    let script =
        "echo 'Downloading update... 0%'; echo '10%'; echo '10%'; echo '45.7%'; echo '30%'";
    let (outcome, events) = run_engine(sh_config(script, &dir)).await;

    outcome.expect("run should succeed");
    // 0 is emitted first, the repeat 10 and the backward 30 are dropped,
    // and exit 0 forces the final 100.
    assert_eq!(progress_values(&events), vec![0, 10, 45, 100]);
    // The percent line never doubles as a phase keyword line.
    assert_eq!(phase_values(&events), vec![Phase::Starting]);
}

#[tokio::test]
async fn phase_transitions_are_forward_only() {
    let dir = TempDir::new().unwrap();
    let script = "echo 'Verifying package'; echo 'Downloading again'; echo 'Installing payload'";
    let (outcome, events) = run_engine(sh_config(script, &dir)).await;

    outcome.expect("run should succeed");
    // "Downloading again" arrives after Verifying and is suppressed.
    assert_eq!(
        phase_values(&events),
        vec![Phase::Starting, Phase::Verifying, Phase::Installing]
    );
}

#[tokio::test]
async fn keyword_then_percent_keeps_line_order() {
    let dir = TempDir::new().unwrap();
    let script = "echo 'Verifying package'; echo '45.7%'";
    let (outcome, events) = run_engine(sh_config(script, &dir)).await;

    outcome.expect("run should succeed");
    let verify_at = events
        .iter()
        .position(|ev| {
            matches!(ev, RunEvent::PhaseChanged { phase: Phase::Verifying, message }
                if message == "Verifying download...")
        })
        .expect("verifying phase event");
    let progress_at = events
        .iter()
        .position(|ev| matches!(ev, RunEvent::Progress { percent: 45 }))
        .expect("truncated progress event");
    assert!(verify_at < progress_at);
}

#[tokio::test]
async fn exit_zero_forces_final_progress_before_resolving() {
    let dir = TempDir::new().unwrap();
    let (outcome, events) = run_engine(sh_config("echo '97%'", &dir)).await;

    let summary = outcome.expect("run should succeed");
    assert_eq!(progress_values(&events), vec![97, 100]);
    assert_eq!(summary.final_percent, 100);
    assert_eq!(summary.final_phase, Phase::Completed);
    assert_eq!(summary.lines_total, 1);
    assert!(!summary.timestamp_utc.is_empty());
}

#[tokio::test]
async fn nonzero_exit_resolves_with_the_code_and_banners() {
    let dir = TempDir::new().unwrap();
    let (outcome, events) = run_engine(sh_config("echo 'kaboom'; exit 1", &dir)).await;

    match outcome {
        Err(RunError::NonZeroExit { code }) => assert_eq!(code, 1),
        other => panic!("expected non-zero exit error, got {other:?}"),
    }
    // No success-side forcing of 100 on the failure path.
    assert!(progress_values(&events).is_empty());

    let log = read_log(&dir);
    assert!(log
        .iter()
        .any(|l| l == "!!! Error: fetch command exited with code 1 !!!"));
    assert!(log.iter().any(|l| l.ends_with("kaboom")));
}

#[tokio::test]
async fn percent_sign_without_digits_is_logged_but_not_progress() {
    let dir = TempDir::new().unwrap();
    let (outcome, events) = run_engine(sh_config("echo 'progress: %'", &dir)).await;

    outcome.expect("run should succeed");
    assert_eq!(progress_values(&events), vec![100]);
    assert!(events
        .iter()
        .any(|ev| matches!(ev, RunEvent::Line { text } if text == "progress: %")));
    let log = read_log(&dir);
    assert!(log.iter().any(|l| l.ends_with("] progress: %")));
}

#[tokio::test]
async fn every_line_lands_in_the_log_exactly_once() {
    let dir = TempDir::new().unwrap();
    let (outcome, _events) = run_engine(sh_config("printf 'alpha\\n\\nbeta\\n'", &dir)).await;

    let summary = outcome.expect("run should succeed");
    assert_eq!(summary.lines_total, 3);

    // Opening banner, "Download started", three stream records (one of them
    // empty), "Download completed", closing banner.
    let log = read_log(&dir);
    assert_eq!(log.len(), 7);
    assert!(log[0].starts_with("=== Fetch session started ("));
    assert!(log[1].ends_with("Download started"));
    assert!(log[2].ends_with("] alpha"));
    assert!(log[4].ends_with("] beta"));
    assert!(log[5].ends_with("Download completed"));
    assert!(log[6].starts_with("=== Download completed ("));
}

#[tokio::test]
async fn missing_program_reports_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let cfg = RunConfig {
        program: "/definitely/not/a/real/binary".to_string(),
        args: vec![],
        session_id: "test-session".to_string(),
        log_path: dir.path().join("session.log"),
    };
    let (outcome, events) = run_engine(cfg).await;

    match outcome {
        Err(e @ RunError::Spawn { .. }) => {
            assert!(e.to_string().contains("failed to spawn"));
        }
        other => panic!("expected spawn failure, got {other:?}"),
    }
    assert!(events.is_empty());

    let log = read_log(&dir);
    assert!(log[0].starts_with("=== Fetch session started ("));
    assert!(log.iter().any(|l| l.starts_with("!!! Error: ")));
}

#[tokio::test]
async fn cancel_kills_the_command_and_keeps_earlier_output() {
    let dir = TempDir::new().unwrap();
    let cfg = sh_config("echo 'before cancel'; exec sleep 30", &dir);
    let log_path = cfg.log_path.clone();

    let logger = SessionLogger::new(log_path.clone());
    let engine = FetchEngine::new(cfg, logger);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let handle = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });

    // Cancel only once the run is demonstrably under way.
    loop {
        match evt_rx.recv().await {
            Some(RunEvent::Line { text }) if text == "before cancel" => break,
            Some(_) => continue,
            None => panic!("engine ended before any output"),
        }
    }
    ctrl_tx.send(EngineControl::Cancel).expect("engine gone");

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("cancel timed out")
        .expect("engine task panicked");
    assert!(matches!(outcome, Err(RunError::Cancelled)));

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("before cancel"));
    assert!(log.contains("!!! Fetch cancelled !!!"));
}
