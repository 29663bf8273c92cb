//! Per-request working directories and their cleanup

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the directory the exporter writes into
const OUTPUT_DIR_NAME: &str = "terraform";

/// Transient directory tree owned by one export request
#[derive(Debug, Clone)]
pub struct ExportWorkspace {
    root: PathBuf,
    output_dir: PathBuf,
    archive_path: PathBuf,
}

impl ExportWorkspace {
    /// Create a uniquely named workspace below `work_dir`
    pub fn create(work_dir: &Path, container: &str) -> io::Result<Self> {
        let name = format!(
            "{}-{}-{}",
            sanitize(container),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );

        let root = work_dir.join(&name);
        let output_dir = root.join(OUTPUT_DIR_NAME);
        let archive_path = work_dir.join(format!("{}.zip", name));

        std::fs::create_dir_all(&output_dir)?;
        tracing::debug!(workspace = %root.display(), "Created export workspace");

        Ok(Self {
            root,
            output_dir,
            archive_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory handed to the exporter and restructured by the normalizer
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Remove the workspace and its archive. Never fails; safe to call repeatedly.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    workspace = %self.root.display(),
                    error = %e,
                    "Failed to remove export workspace"
                );
            }
        }

        if let Err(e) = std::fs::remove_file(&self.archive_path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    archive = %self.archive_path.display(),
                    error = %e,
                    "Failed to remove export archive"
                );
            }
        }
    }
}

/// Keep directory names portable; anything unusual becomes `_`
fn sanitize(container: &str) -> String {
    let cleaned: String = container
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();

    if cleaned.is_empty() {
        "export".to_string()
    } else {
        cleaned
    }
}

/// Owns a workspace and removes it exactly once.
///
/// Call [`CleanupGuard::finish`] on paths that can await; otherwise the guard
/// cleans up when dropped (on the blocking pool when a runtime is available).
pub struct CleanupGuard {
    workspace: ExportWorkspace,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(workspace: ExportWorkspace) -> Self {
        Self {
            workspace,
            armed: true,
        }
    }

    pub fn workspace(&self) -> &ExportWorkspace {
        &self.workspace
    }

    /// Remove the workspace and wait until it is gone
    pub async fn finish(mut self) {
        self.armed = false;
        let workspace = self.workspace.clone();

        if let Err(e) = tokio::task::spawn_blocking(move || workspace.cleanup()).await {
            tracing::warn!(error = %e, "Workspace cleanup task failed");
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let workspace = self.workspace.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || workspace.cleanup());
            }
            Err(_) => workspace.cleanup(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspaces_are_isolated() {
        let temp = TempDir::new().unwrap();

        let barrier = std::sync::Barrier::new(2);

        // Two requests for the same container, created at the same instant
        let (a, b) = std::thread::scope(|scope| {
            let create = || {
                barrier.wait();
                ExportWorkspace::create(temp.path(), "rg-1").unwrap()
            };
            let first = scope.spawn(create);
            let second = scope.spawn(create);
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_ne!(a.root(), b.root());
        assert_ne!(a.archive_path(), b.archive_path());
        assert!(a.output_dir().is_dir());
        assert!(b.output_dir().is_dir());

        a.cleanup();
        assert!(!a.root().exists());
        assert!(b.root().exists());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let workspace = ExportWorkspace::create(temp.path(), "rg").unwrap();
        std::fs::write(workspace.output_dir().join("main.tf"), "x").unwrap();
        std::fs::write(workspace.archive_path(), "zip").unwrap();

        workspace.cleanup();
        workspace.cleanup();

        assert!(!workspace.root().exists());
        assert!(!workspace.archive_path().exists());
    }

    #[test]
    fn test_sanitize_container_name() {
        assert_eq!(sanitize("my rg.prod"), "my_rg_prod");
        assert_eq!(sanitize(""), "export");
        assert_eq!(sanitize("rg-1_a"), "rg-1_a");
    }

    #[test]
    fn test_guard_cleans_up_on_drop_without_runtime() {
        let temp = TempDir::new().unwrap();
        let workspace = ExportWorkspace::create(temp.path(), "rg").unwrap();
        let root = workspace.root().to_path_buf();

        drop(CleanupGuard::new(workspace));

        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_guard_finish_removes_workspace() {
        let temp = TempDir::new().unwrap();
        let workspace = ExportWorkspace::create(temp.path(), "rg").unwrap();
        let root = workspace.root().to_path_buf();

        let guard = CleanupGuard::new(workspace);
        assert_eq!(guard.workspace().root(), root.as_path());
        guard.finish().await;

        assert!(!root.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
