use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::error::Result;

/// Transient storage for in-progress and completed output files.
///
/// Each conversion writes into its own subdirectory named by the job id, so
/// concurrent runs never see each other's files. Nothing in here is meant to
/// outlive the retention window.
#[derive(Debug, Clone)]
pub struct Scratch {
    root: PathBuf,
    retention: Duration,
}

impl Scratch {
    /// Default root under the invoking user's home directory.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".webtube_tmp")
    }

    pub fn new(root: PathBuf, retention: Duration) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, retention })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the private directory for one conversion.
    pub fn job_dir(&self, id: Uuid) -> Result<PathBuf> {
        let dir = self.root.join(id.to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove one job's directory and everything in it. Missing is fine.
    pub fn remove_job_dir(&self, id: Uuid) {
        let dir = self.root.join(id.to_string());
        if dir.exists() {
            let _ = std::fs::remove_dir_all(&dir);
        }
    }

    /// Delete job directories older than the retention window.
    ///
    /// Returns how many were removed. Entries that cannot be read are left
    /// alone rather than treated as errors.
    pub fn sweep(&self) -> usize {
        self.sweep_except(&[])
    }

    /// Like `sweep`, but directories belonging to the given jobs survive
    /// regardless of age.
    pub fn sweep_except(&self, keep: &[Uuid]) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };

        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let held = Uuid::parse_str(&name.to_string_lossy())
                .map(|id| keep.contains(&id))
                .unwrap_or(false);
            if held {
                continue;
            }
            let Ok(modified) = meta.modified() else { continue };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.retention && std::fs::remove_dir_all(entry.path()).is_ok() {
                removed += 1;
            }
        }

        removed
    }
}

/// The most recently modified file in a directory, if any.
///
/// The external tool resolves its own output name from the title template,
/// so after a successful exit this scan is how the result is identified.
pub fn newest_file(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;

    let mut files: Vec<(SystemTime, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((meta.modified().ok()?, entry.path()))
        })
        .collect();

    files.sort_by(|a, b| b.0.cmp(&a.0));
    files.into_iter().next().map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch_at(path: &Path, t: SystemTime) {
        let file = File::create(path).unwrap();
        file.set_modified(t).unwrap();
    }

    #[test]
    fn test_newest_file_picks_latest_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        touch_at(&dir.path().join("a.mp4"), base);
        touch_at(&dir.path().join("b.mp3"), base + Duration::from_secs(1));

        let newest = newest_file(dir.path()).unwrap();
        assert_eq!(newest.file_name().unwrap(), "b.mp3");
    }

    #[test]
    fn test_newest_file_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(newest_file(dir.path()).is_none());
    }

    #[test]
    fn test_newest_file_ignores_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch_at(&dir.path().join("only.mp3"), SystemTime::now());

        let newest = newest_file(dir.path()).unwrap();
        assert_eq!(newest.file_name().unwrap(), "only.mp3");
    }

    #[test]
    fn test_sweep_removes_only_stale_dirs() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Scratch::new(root.path().to_path_buf(), Duration::from_secs(3600)).unwrap();

        let fresh = scratch.job_dir(Uuid::new_v4()).unwrap();

        let stale_id = Uuid::new_v4();
        let stale = scratch.job_dir(stale_id).unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        File::open(&stale).unwrap().set_modified(old).unwrap();

        let removed = scratch.sweep();
        assert_eq!(removed, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_sweep_except_spares_held_jobs() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Scratch::new(root.path().to_path_buf(), Duration::from_secs(3600)).unwrap();

        let held_id = Uuid::new_v4();
        let held = scratch.job_dir(held_id).unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        File::open(&held).unwrap().set_modified(old).unwrap();

        assert_eq!(scratch.sweep_except(&[held_id]), 0);
        assert!(held.exists());

        assert_eq!(scratch.sweep(), 1);
        assert!(!held.exists());
    }

    #[test]
    fn test_remove_job_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let scratch = Scratch::new(root.path().to_path_buf(), Duration::from_secs(60)).unwrap();

        let id = Uuid::new_v4();
        let dir = scratch.job_dir(id).unwrap();
        File::create(dir.join("out.mp3")).unwrap();

        scratch.remove_job_dir(id);
        assert!(!dir.exists());

        // Second removal of the same job is a no-op
        scratch.remove_job_dir(id);
    }
}
