use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Generate a random session ID for one fetch run.
pub fn gen_session_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub program: String,
    pub args: Vec<String>,
    pub session_id: String,
    pub log_path: PathBuf,
}

impl RunConfig {
    /// Render the command line the way it would be typed in a shell.
    pub fn rendered_command(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Coarse stages of a fetch run. Ordered so that backward transitions
/// reported by out-of-order output can be detected and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Starting,
    Downloading,
    Verifying,
    Installing,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Starting => "starting",
            Phase::Downloading => "downloading",
            Phase::Verifying => "verifying",
            Phase::Installing => "installing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    /// Raw output line, forwarded verbatim for every line the command prints.
    Line {
        text: String,
    },
    /// Percent complete; strictly increasing within one run.
    Progress {
        percent: u8,
    },
    PhaseChanged {
        phase: Phase,
        message: String,
    },
    Info(InfoEvent),
    Completed {
        // Box to keep RunEvent size small; RunSummary is large and would bloat the enum.
        summary: Box<RunSummary>,
    },
    Failed {
        message: String,
    },
}

/// Structured info events emitted outside the engine and consumed by front ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    // Front-end/controller messages generated outside the engine.
    Message(String),
    LoggingTo { path: PathBuf },
    CancelRequested,
}

impl InfoEvent {
    /// Render a human-readable message for front ends.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::LoggingTo { path } => {
                format!("Logging session to {}", path.display())
            }
            InfoEvent::CancelRequested => {
                "Cancelling fetch, waiting for the command to stop".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub timestamp_utc: String,
    pub session_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    pub final_percent: u8,
    pub final_phase: Phase,
    pub duration_ms: u64,
    pub lines_total: u64,
}
