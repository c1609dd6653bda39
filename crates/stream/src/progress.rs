//! Liveness heartbeat: a per-listener timestamp file whose mtime the pod
//! liveness probe watches.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

/// Rate-limited writer for one listener's heartbeat file. Clones share the
/// rate-limit state.
#[derive(Clone)]
pub struct ProgressWriter {
    path: PathBuf,
    min_interval: Duration,
    last: Arc<Mutex<Option<Instant>>>,
}

impl ProgressWriter {
    pub fn new(dir: &Path, listener: &str, min_interval: Duration) -> Self {
        Self {
            path: dir.join(format!("{listener}.heartbeat")),
            min_interval,
            last: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the heartbeat now. Failures are logged and swallowed; a missed
    /// heartbeat must never take the listener down.
    pub fn report(&self) {
        if let Err(error) = self.write_now() {
            warn!(path = %self.path.display(), %error, "progress heartbeat write failed");
        }
    }

    /// Write the heartbeat unless one was written within the interval.
    pub fn report_rate_limited(&self) {
        let due = {
            let last = self.last.lock().expect("heartbeat state poisoned");
            last.map(|t| t.elapsed() >= self.min_interval).unwrap_or(true)
        };
        if due {
            self.report();
        }
    }

    fn write_now(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, chrono::Utc::now().to_rfc3339())?;
        *self.last.lock().expect("heartbeat state poisoned") = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ProgressWriter::new(dir.path(), "workflow", Duration::from_secs(60));

        writer.report_rate_limited();
        let first = std::fs::read_to_string(writer.path()).unwrap();
        assert!(!first.is_empty());

        // Within the interval: the file is left alone.
        std::fs::write(writer.path(), "sentinel").unwrap();
        writer.report_rate_limited();
        assert_eq!(std::fs::read_to_string(writer.path()).unwrap(), "sentinel");

        // An unconditional report always lands.
        writer.report();
        assert_ne!(std::fs::read_to_string(writer.path()).unwrap(), "sentinel");
    }

    #[test]
    fn write_failure_is_swallowed() {
        // A directory path that cannot be a file.
        let dir = tempfile::tempdir().unwrap();
        let writer = ProgressWriter::new(dir.path(), "", Duration::from_secs(0));
        std::fs::create_dir_all(writer.path()).unwrap();
        writer.report();
    }
}
