use crate::domain::errors::EngineError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An advisory exclusive lock on `<var_dir>/<name>.lock`, held for the
/// owner's lifetime. OS file-lock semantics release it on every exit path,
/// including crashes.
#[derive(Debug)]
pub struct JobLock {
    file: File,
    path: PathBuf,
}

impl JobLock {
    /// Non-blocking acquisition; contention maps to `Concurrent`.
    pub fn acquire(var_dir: &Path, name: &str) -> Result<JobLock, EngineError> {
        fs::create_dir_all(var_dir).map_err(|e| {
            EngineError::PersistenceFault(format!(
                "cannot create lock directory {}: {e}",
                var_dir.display()
            ))
        })?;
        let path = var_dir.join(format!("{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                EngineError::PersistenceFault(format!(
                    "cannot open lock file {}: {e}",
                    path.display()
                ))
            })?;

        file.try_lock_exclusive()
            .map_err(|_| EngineError::Concurrent {
                job: name.to_string(),
            })?;

        debug!(path = %path.display(), "lock acquired");
        Ok(JobLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_within_process() {
        let dir = tempfile::tempdir().unwrap();

        let first = JobLock::acquire(dir.path(), "update-quotes").unwrap();
        let second = JobLock::acquire(dir.path(), "update-quotes");
        match second {
            Err(EngineError::Concurrent { job }) => assert_eq!(job, "update-quotes"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("second acquisition must fail"),
        }

        // A different job class is unaffected
        JobLock::acquire(dir.path(), "backtest").unwrap();

        // Released on drop
        drop(first);
        JobLock::acquire(dir.path(), "update-quotes").unwrap();
    }
}
