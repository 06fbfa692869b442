//! Ephemeral artifact tracking.
//!
//! Every scratch file handed to a backend (serialized configs, certificate
//! material) is registered here the moment its path is allocated, so teardown
//! can delete it whether or not the owning backend ever started.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hopchain_id::RunId;
use tracing::{debug, warn};

/// Tracks scratch files created during one orchestration run.
#[derive(Debug)]
pub struct ArtifactTracker {
    dir: PathBuf,
    token: String,
    seq: u64,
    paths: BTreeSet<PathBuf>,
}

impl ArtifactTracker {
    pub fn new(dir: impl Into<PathBuf>, run_id: RunId) -> Self {
        Self {
            dir: dir.into(),
            token: run_id.token(),
            seq: 0,
            paths: BTreeSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a unique path `{prefix}_{run}_{seq}.{extension}` and track it.
    ///
    /// The run token differs between runs and the sequence strictly increases
    /// within one, so names never collide under rapid restart.
    pub fn allocate(&mut self, prefix: &str, extension: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        self.seq += 1;
        let path = self
            .dir
            .join(format!("{prefix}_{}_{:04}.{extension}", self.token, self.seq));

        self.paths.insert(path.clone());
        Ok(path)
    }

    /// Allocate a path and write `contents` to it.
    pub fn write(&mut self, prefix: &str, extension: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.allocate(prefix, extension)?;
        fs::write(&path, contents)?;
        debug!(path = %path.display(), bytes = contents.len(), "Wrote ephemeral artifact");
        Ok(path)
    }

    /// Track a file created elsewhere.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Delete every tracked file. Failures are logged and swallowed; a file
    /// that is already gone counts as deleted.
    pub fn purge(&mut self) -> usize {
        let mut removed = 0;
        for path in std::mem::take(&mut self.paths) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to delete ephemeral artifact"
                    );
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ArtifactTracker::new(dir.path(), RunId::new());

        let a = tracker.allocate("trojan", "json").unwrap();
        let b = tracker.allocate("trojan", "json").unwrap();

        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("trojan_"));
        assert_eq!(a.extension().unwrap(), "json");
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_names_differ_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = ArtifactTracker::new(dir.path(), RunId::new());
        let mut second = ArtifactTracker::new(dir.path(), RunId::new());

        assert_ne!(
            first.allocate("naive", "json").unwrap(),
            second.allocate("naive", "json").unwrap()
        );
    }

    #[test]
    fn test_purge_removes_files_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ArtifactTracker::new(dir.path().join("scratch"), RunId::new());

        let written = tracker.write("rb", "toml", "[client]\n").unwrap();
        assert_eq!(fs::read_to_string(&written).unwrap(), "[client]\n");

        // Allocated but never written.
        let reserved = tracker.allocate("hysteria", "ca").unwrap();
        assert!(!reserved.exists());

        assert_eq!(tracker.purge(), 1);
        assert!(!written.exists());
        assert!(tracker.is_empty());

        // Second purge is a no-op.
        assert_eq!(tracker.purge(), 0);
    }

    #[test]
    fn test_register_external_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        fs::write(&path, "pem").unwrap();

        let mut tracker = ArtifactTracker::new(dir.path(), RunId::new());
        tracker.register(&path);
        tracker.register(&path);

        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(&path));
        tracker.purge();
        assert!(!path.exists());
    }
}
