//! Ephemeral per-job workspaces.
//!
//! Each job gets `{base}/code-execution/{submission_id}-{epoch_ms}` on a
//! tmpfs-backed root. The directory must disappear on every exit path,
//! including panics, so removal lives in `Drop`; `cleanup()` exists for
//! the orderly path where the error is worth logging.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const WORKSPACE_SUBDIR: &str = "code-execution";

/// RAII guard over one job's workspace directory.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: PathBuf,
    cleaned: bool,
}

impl JobWorkspace {
    /// Create a fresh workspace for the submission.
    pub fn create(base: &Path, submission_id: Uuid) -> std::io::Result<Self> {
        let epoch_ms = chrono::Utc::now().timestamp_millis();
        let dir = base
            .join(WORKSPACE_SUBDIR)
            .join(format!("{}-{}", submission_id, epoch_ms));

        std::fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Created job workspace");

        Ok(Self {
            dir,
            cleaned: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a file into the workspace.
    pub fn write_file(&self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.dir.join(filename);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Remove the workspace now, reporting failure.
    pub fn cleanup(mut self) -> std::io::Result<()> {
        self.cleaned = true;
        std::fs::remove_dir_all(&self.dir)
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

/// Remove leftover workspaces older than `max_age`.
///
/// Run at worker startup: a crashed worker leaves directories behind, and
/// the tmpfs root is shared by all jobs on the host.
pub fn sweep_stale_workspaces(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    let root = base.join(WORKSPACE_SUBDIR);
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let modified = entry.metadata().and_then(|m| m.modified());
        let stale = matches!(
            modified.map(|m| now.duration_since(m).unwrap_or_default()),
            Ok(age) if age > max_age
        );

        if stale {
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    removed += 1;
                    debug!(dir = %entry.path().display(), "Swept stale workspace");
                }
                Err(e) => {
                    warn!(dir = %entry.path().display(), error = %e, "Failed to sweep workspace");
                }
            }
        }
    }

    Ok(removed)
}
