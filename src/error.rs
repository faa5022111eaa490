use thiserror::Error;

/// Errors produced by the fetch core. `AlreadyRunning` is a recoverable
/// rejection returned to the caller; the rest are terminal run outcomes.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("a fetch is already running")]
    AlreadyRunning,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error reading command output: {source}")]
    Stream {
        #[source]
        source: std::io::Error,
    },

    #[error("fetch command exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("fetch cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RunError>;
