pub mod classify;
pub mod lines;

use crate::error::{Result, RunError};
use crate::logger::SessionLogger;
use crate::model::{Phase, RunConfig, RunEvent, RunSummary};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::sync::mpsc;

use lines::LineChunk;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Cancel the fetch: the command is killed and its remaining output drained.
    Cancel,
}

/// Per-run worker: spawns the fetch command, classifies its output line by
/// line, forwards events, and records everything to the session log.
pub struct FetchEngine {
    cfg: RunConfig,
    logger: SessionLogger,
}

impl FetchEngine {
    pub fn new(cfg: RunConfig, logger: SessionLogger) -> Self {
        Self { cfg, logger }
    }

    /// Drive one fetch to its terminal outcome.
    ///
    /// Emits `Line` for every output line, `Progress` for strictly increasing
    /// percentages, and `PhaseChanged` for forward phase transitions, all in
    /// line order. Resolves to a summary on exit code 0 and to a `RunError`
    /// otherwise; terminal events are the caller's responsibility so they can
    /// be sequenced after the engine task is joined.
    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<RunEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunSummary> {
        let started = Instant::now();

        self.logger.begin(&self.cfg.rendered_command());

        let mut child = match Command::new(&self.cfg.program)
            .args(&self.cfg.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the engine task is dropped mid-run (process shutdown), take
            // the fetch down with it instead of leaving an orphan.
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Err(self.fail(RunError::Spawn {
                    command: self.cfg.program.clone(),
                    source: e,
                }));
            }
        };

        self.logger.record("Download started");
        let _ = event_tx.send(RunEvent::PhaseChanged {
            phase: Phase::Starting,
            message: "Download started".to_string(),
        });

        let mut line_rx = lines::merge_output(child.stdout.take(), child.stderr.take());

        let mut last_percent: Option<u8> = None;
        let mut phase = Phase::Starting;
        let mut lines_total: u64 = 0;
        let mut stream_fault: Option<std::io::Error> = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                chunk = line_rx.recv() => {
                    match chunk {
                        Some(LineChunk::Line(raw)) => {
                            let line = raw.trim();
                            lines_total += 1;
                            self.logger.record(line);
                            let _ = event_tx.send(RunEvent::Line {
                                text: line.to_string(),
                            });

                            let c = classify::classify(line, last_percent);
                            if let Some(percent) = c.progress {
                                if last_percent.map_or(true, |prev| percent > prev) {
                                    last_percent = Some(percent);
                                    let _ = event_tx.send(RunEvent::Progress { percent });
                                }
                            }
                            if let Some((next, message)) = c.phase {
                                if next > phase {
                                    phase = next;
                                    let _ = event_tx.send(RunEvent::PhaseChanged {
                                        phase: next,
                                        message: message.to_string(),
                                    });
                                }
                            }
                        }
                        Some(LineChunk::Fault(e)) => {
                            // Keep draining the other pipe; the first fault
                            // decides the outcome once the stream ends.
                            if stream_fault.is_none() {
                                stream_fault = Some(e);
                            }
                        }
                        None => break,
                    }
                }
                Some(EngineControl::Cancel) = control_rx.recv(), if !cancelled => {
                    cancelled = true;
                    let _ = child.start_kill();
                    // The loop keeps running so buffered output is drained
                    // and logged before the run resolves.
                }
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => return Err(self.fail(RunError::Stream { source: e })),
        };

        if cancelled {
            self.logger.cancelled();
            return Err(RunError::Cancelled);
        }

        if let Some(e) = stream_fault {
            return Err(self.fail(RunError::Stream { source: e }));
        }

        if !status.success() {
            return Err(self.fail(RunError::NonZeroExit {
                code: status.code().unwrap_or(-1),
            }));
        }

        self.logger.record("Download completed");
        if last_percent != Some(100) {
            let _ = event_tx.send(RunEvent::Progress { percent: 100 });
        }
        phase = Phase::Completed;
        self.logger.completed();

        Ok(RunSummary {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            session_id: self.cfg.session_id.clone(),
            command: self.cfg.program.clone(),
            args: self.cfg.args.clone(),
            log_path: self.cfg.log_path.clone(),
            final_percent: 100,
            final_phase: phase,
            duration_ms: started.elapsed().as_millis() as u64,
            lines_total,
        })
    }

    // A terminal fault lands in the log as a timestamped record in sequence,
    // then as the closing banner.
    fn fail(&self, err: RunError) -> RunError {
        let message = err.to_string();
        self.logger.record(&message);
        self.logger.failed(&message);
        err
    }
}
