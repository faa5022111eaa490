//! Run lifecycle controller.
//!
//! Owns the at-most-one-run state machine around the fetch engine and emits
//! events for presentation layers.

use crate::engine::{EngineControl, FetchEngine};
use crate::error::{Result, RunError};
use crate::logger::SessionLogger;
use crate::model::{gen_session_id, InfoEvent, RunConfig, RunEvent, RunSummary};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinError;
use tokio::time::Duration;

/// Commands emitted by front ends to control the fetch lifecycle.
#[derive(Debug, Clone)]
pub enum RunnerCommand {
    Start,
    Cancel,
    Quit,
}

/// Internal handle for a running fetch task.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<Result<RunSummary>>>,
}

/// At-most-one-run lifecycle owner. A controller is idle until `start()`
/// spawns an engine task; it stays "running" until the task's outcome has
/// been observed through [`drive`], at which point the terminal event is
/// emitted and a new run may begin.
pub struct RunController {
    cfg: RunConfig,
    event_tx: UnboundedSender<RunEvent>,
    run: Option<RunCtx>,
}

impl RunController {
    pub fn new(cfg: RunConfig, event_tx: UnboundedSender<RunEvent>) -> Self {
        Self {
            cfg,
            event_tx,
            run: None,
        }
    }

    /// Spawn the engine task for one run.
    ///
    /// Returns [`RunError::AlreadyRunning`] while a run is active; the active
    /// run is not disturbed and no second process is spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.run.is_some() {
            return Err(RunError::AlreadyRunning);
        }

        // Each run gets its own session ID; the log path stays stable for the
        // lifetime of the controller and is truncated by the session opener.
        let mut cfg = self.cfg.clone();
        cfg.session_id = gen_session_id();

        // Announce before spawning so these always precede engine output in
        // the event stream.
        let _ = self.event_tx.send(RunEvent::Info(InfoEvent::Message(
            "Preparing download...".into(),
        )));
        let _ = self.event_tx.send(RunEvent::Info(InfoEvent::LoggingTo {
            path: cfg.log_path.clone(),
        }));

        let logger = SessionLogger::new(cfg.log_path.clone());
        let engine = FetchEngine::new(cfg, logger);
        let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move { engine.run(event_tx, ctrl_rx).await });

        self.run = Some(RunCtx {
            ctrl_tx,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Request cooperative cancellation. Idempotent; a no-op when idle.
    pub fn cancel(&mut self) {
        if let Some(ctx) = &self.run {
            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
            let _ = self
                .event_tx
                .send(RunEvent::Info(InfoEvent::CancelRequested));
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Await the active run's completion without consuming its JoinHandle, so
    /// the future can be dropped by a select loop and recreated later. Pends
    /// forever while idle.
    async fn wait_done(&mut self) -> std::result::Result<Result<RunSummary>, JoinError> {
        if let Some(ctx) = &mut self.run {
            if let Some(h) = ctx.handle.as_mut() {
                return h.await;
            }
        }
        futures::future::pending().await
    }

    /// Record an observed outcome: clear the run slot and emit the terminal
    /// event. All in-run events are already in the channel by this point, so
    /// the terminal event is last.
    fn finish(&mut self, join_res: std::result::Result<Result<RunSummary>, JoinError>) {
        self.run = None;
        match join_res {
            Ok(Ok(summary)) => {
                let _ = self.event_tx.send(RunEvent::Completed {
                    summary: Box::new(summary),
                });
            }
            Ok(Err(e)) => {
                let _ = self.event_tx.send(RunEvent::Failed {
                    message: e.to_string(),
                });
            }
            Err(e) => {
                let _ = self.event_tx.send(RunEvent::Failed {
                    message: format!("fetch task join failed: {e}"),
                });
            }
        }
    }
}

/// Orchestrate fetch runs based on front-end commands and emit events back to
/// presentation layers. Returns once a quit is requested and any active run
/// has resolved.
pub async fn drive(
    cfg: RunConfig,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<RunnerCommand>,
    fetch_on_launch: bool,
) -> anyhow::Result<()> {
    let mut controller = RunController::new(cfg, event_tx.clone());
    if fetch_on_launch {
        // A fresh controller is idle, so this cannot be rejected.
        let _ = controller.start();
    }

    let mut quit_pending = false;
    // Cancel watchdog: if a kill takes too long, emit a status message to keep
    // front-end feedback alive.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(RunnerCommand::Start) => {
                        if let Err(e) = controller.start() {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(
                                e.to_string(),
                            )));
                        }
                    }
                    Some(RunnerCommand::Cancel) => {
                        if controller.is_running() {
                            controller.cancel();
                            cancel_deadline =
                                Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(RunnerCommand::Quit) | None => {
                        // Quit waits for the current run to resolve so the
                        // terminal event and log banners are still written.
                        quit_pending = true;
                        if controller.is_running() {
                            controller.cancel();
                            cancel_deadline =
                                Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            break;
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it
            // can be dropped if another select branch is chosen, and we'll
            // never observe completion.
            done = controller.wait_done() => {
                controller.finish(done);
                cancel_deadline = None;
                if quit_pending {
                    break;
                }
            }
            // If the kill stalls (e.g. the command ignores it), keep the user
            // informed.
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && controller.is_running() {
                        let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(
                            "Still cancelling...".into(),
                        )));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }

    Ok(())
}
