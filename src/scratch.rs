//! Per-job scratch directories
//!
//! Every job gets a `docmerge-*` directory under the configured scratch root.
//! The directory is removed when [`ScratchSpace`] drops, on success, failure or
//! cancellation alike. [`sweep_stale`] removes directories left behind by a
//! crashed process.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name prefix of every scratch directory
pub const SCRATCH_PREFIX: &str = "docmerge-";

/// Scratch directory owned by one job
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Create a fresh scratch directory under `root` (created if missing)
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Created scratch directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, reporting failures instead of ignoring them
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Outcome of a stale-scratch sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    pub failed: usize,
}

/// Delete `docmerge-*` directories under `root` that were last modified at
/// least `max_age` ago
pub fn sweep_stale(root: &Path, max_age: Duration) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e),
    };
    let now = SystemTime::now();

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            report.kept += 1;
            continue;
        }

        let path = entry.path();
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Removed stale scratch directory");
                report.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove stale scratch directory");
                report.failed += 1;
            }
        }
    }

    if !report.removed.is_empty() {
        info!(root = %root.display(), removed = report.removed.len(), "Swept stale scratch directories");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    // TC-SCR-001: Scratch directory disappears on drop
    #[test]
    fn test_scratch_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let scratch = ScratchSpace::create(root.path()).unwrap();
            std::fs::write(scratch.path().join("member.bin"), b"x").unwrap();
            assert!(scratch
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(SCRATCH_PREFIX));
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    // TC-SCR-002: Missing root is created
    #[test]
    fn test_scratch_creates_root() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let scratch = ScratchSpace::create(&nested).unwrap();
        assert!(scratch.path().starts_with(&nested));
        scratch.close().unwrap();
    }

    // TC-SCR-003: Sweep only touches prefixed directories
    #[test]
    fn test_sweep_stale() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("docmerge-old");
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("leftover.pdf"), b"%PDF-").unwrap();
        let unrelated = root.path().join("other-dir");
        std::fs::create_dir(&unrelated).unwrap();
        std::fs::write(root.path().join("docmerge-file"), b"not a dir").unwrap();

        let report = sweep_stale(root.path(), Duration::ZERO).unwrap();
        assert_eq!(report.removed, vec![stale.clone()]);
        assert_eq!(report.failed, 0);
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    // TC-SCR-004: Fresh directories survive a sweep
    #[test]
    fn test_sweep_keeps_fresh() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::create(root.path()).unwrap();
        let report = sweep_stale(root.path(), Duration::from_secs(3600)).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.kept, 1);
        assert!(scratch.path().exists());
    }

    #[test]
    fn test_sweep_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let report = sweep_stale(&root.path().join("nope"), Duration::ZERO).unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
