use crate::types::validate_segment;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_BACKOFF_MS: u64 = 5000;
const INITIAL_BACKOFF_MS: u64 = 10;

/// PID lock file serializing runs that touch the same project
pub struct Lock {
    lock_path: PathBuf,
}

impl Lock {
    /// Acquire the lock called `name` under `lock_dir`, waiting with
    /// exponential backoff while another live process holds it
    ///
    /// `name` must be a valid path segment, so the lock file always lands
    /// inside `lock_dir`.
    pub async fn acquire_named(lock_dir: &Path, name: &str) -> Result<Self> {
        validate_segment(name)?;
        fs::create_dir_all(lock_dir)
            .with_context(|| format!("Failed to create lock directory {}", lock_dir.display()))?;
        let lock_path = lock_dir.join(format!("{}.lock", name));
        let pid = std::process::id();

        let mut backoff = INITIAL_BACKOFF_MS;
        let mut total_wait = 0;

        loop {
            match try_acquire_lock(&lock_path, pid) {
                Ok(()) => return Ok(Self { lock_path }),
                Err(e) => {
                    if total_wait >= MAX_BACKOFF_MS {
                        anyhow::bail!(
                            "Failed to acquire lock '{}' after {}ms: {}",
                            name,
                            MAX_BACKOFF_MS,
                            e
                        );
                    }

                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    total_wait += backoff;
                    backoff = (backoff * 2).min(MAX_BACKOFF_MS - total_wait).max(1);
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn try_acquire_lock(lock_path: &Path, pid: u32) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(mut file) => {
            write!(file, "{}", pid).context("Failed to write lock file")?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let content = fs::read_to_string(lock_path).unwrap_or_default();
            match content.trim().parse::<u32>() {
                Ok(existing_pid) if is_process_alive(existing_pid) => {
                    anyhow::bail!("Lock held by process {}", existing_pid)
                }
                // Stale or unreadable lock
                _ => {
                    fs::remove_file(lock_path).context("Failed to remove stale lock")?;
                    anyhow::bail!("Removed stale lock")
                }
            }
        }
        Err(e) => Err(e).context("Failed to create lock file"),
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use std::io;

    // Signal 0 only checks for existence
    let result = unsafe { libc::kill(pid as i32, 0) };

    if result == 0 {
        true
    } else {
        let error = io::Error::last_os_error();
        error.raw_os_error() != Some(libc::ESRCH)
    }
}

#[cfg(windows)]
fn is_process_alive(pid: u32) -> bool {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::OpenProcess;
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            false
        } else {
            CloseHandle(handle);
            true
        }
    }
}

#[cfg(not(any(unix, windows)))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_named_lock_acquire_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = Lock::acquire_named(dir.path(), "acme").await.unwrap();
        assert!(dir.path().join("acme.lock").exists());
        assert_eq!(lock.path(), dir.path().join("acme.lock"));

        drop(lock);
        assert!(!dir.path().join("acme.lock").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("acme.lock"), "not-a-pid").unwrap();

        let lock = Lock::acquire_named(dir.path(), "acme").await.unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let _a = Lock::acquire_named(dir.path(), "acme").await.unwrap();
        let _b = Lock::acquire_named(dir.path(), "globex").await.unwrap();
    }

    #[tokio::test]
    async fn test_name_outside_lock_dir_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let lock_dir = root.path().join("data/.locks");
        let outside = root.path().join("victim.lock");
        fs::write(&outside, "not-a-pid").unwrap();

        assert!(Lock::acquire_named(&lock_dir, "../../victim").await.is_err());
        assert!(Lock::acquire_named(&lock_dir, "a/b").await.is_err());
        assert_eq!(fs::read_to_string(&outside).unwrap(), "not-a-pid");
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        // Our own PID is alive, so the file is never treated as stale
        fs::write(dir.path().join("acme.lock"), std::process::id().to_string()).unwrap();

        let err = Lock::acquire_named(dir.path(), "acme").await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to acquire lock 'acme'"));
        assert!(dir.path().join("acme.lock").exists());
    }
}
