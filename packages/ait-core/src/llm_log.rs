//! Dedicated append-only log for prompts and model replies.
//!
//! Kept separate from the general application log (`tracing`/`log`)
//! because it's operationally a different artifact: a full transcript of
//! everything sent to and received from chat providers, useful for
//! auditing and debugging prompts, that an operator may want to rotate,
//! redact, or retain under a different policy than general server logs.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

/// Appends timestamped lines to a single log file, serialized behind a
/// mutex since multiple workers write concurrently.
pub struct LlmLog {
    path: Option<PathBuf>,
    file: Mutex<Option<std::fs::File>>,
}

impl LlmLog {
    /// `path` of `None` disables the log entirely; `record` becomes a no-op.
    pub fn open(path: Option<PathBuf>) -> std::io::Result<Self> {
        let file = match &path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Some(
                    std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)?,
                )
            }
            None => None,
        };
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, message: &str) {
        let line = format!("{} {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), message);
        // Mirror to the general log too so a single `tracing` sink still
        // shows generation activity even if the LLM log is disabled.
        log::info!("{message}");

        let mut guard = self.file.lock().expect("llm log mutex poisoned");
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()) {
                log::error!(
                    "failed to write llm log entry to {}: {e}",
                    self.path.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_line_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("llm.log");
        let log = LlmLog::open(Some(path.clone())).unwrap();
        log.record("hello world");
        log.record("second line");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("hello world"));
        assert!(content.contains("second line"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn disabled_log_does_not_error() {
        let log = LlmLog::open(None).unwrap();
        log.record("should be a no-op on disk");
    }
}
