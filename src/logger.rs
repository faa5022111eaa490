use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const STAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Append-only session log. The file handle is acquired and released around
/// every write, so a crashed run never leaves the log held open and external
/// tools can tail it mid-session. Write failures degrade to a `tracing` warning
/// instead of touching the run itself.
pub struct SessionLogger {
    path: PathBuf,
}

impl SessionLogger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First write of a session: truncate any leftover contents and write the
    /// opening banner.
    pub fn begin(&self, command: &str) {
        let banner = format!("=== Fetch session started ({}): {} ===", stamp(), command);
        self.write_line(&banner, true);
    }

    /// Append one timestamped record.
    pub fn record(&self, message: &str) {
        let line = format!("[{}] {}", stamp(), message);
        self.write_line(&line, false);
    }

    /// Append the success banner.
    pub fn completed(&self) {
        let banner = format!("=== Download completed ({}) ===", stamp());
        self.write_line(&banner, false);
    }

    /// Append the failure banner.
    pub fn failed(&self, message: &str) {
        let banner = format!("!!! Error: {} !!!", message);
        self.write_line(&banner, false);
    }

    /// Append the cancellation banner.
    pub fn cancelled(&self) {
        self.write_line("!!! Fetch cancelled !!!", false);
    }

    fn write_line(&self, line: &str, truncate: bool) {
        if let Err(e) = self.try_write(line, truncate) {
            tracing::warn!(path = %self.path.display(), error = %e, "session log write failed");
        }
    }

    fn try_write(&self, line: &str, truncate: bool) -> std::io::Result<()> {
        if truncate {
            if let Some(dir) = self.path.parent() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!truncate)
            .truncate(truncate)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn stamp() -> String {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .format(STAMP_FORMAT)
        .unwrap_or_else(|_| "unknown".into())
}
