use crate::errors::MimicError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep_until(&self, deadline: Instant) -> Result<(), MimicError>;
}

pub trait FileSystem: Send + Sync {
    fn read(&self, path: &Path) -> Result<Vec<u8>, MimicError>;
    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), MimicError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), MimicError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), MimicError>;
    fn remove_file(&self, path: &Path) -> Result<(), MimicError>;
    fn exists(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> Result<String, MimicError> {
        String::from_utf8(self.read(path)?)
            .map_err(|e| MimicError::Io(format!("{} is not utf-8: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), MimicError> {
        self.write(path, contents.as_bytes())
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleeps the calling thread until the deadline on the monotonic clock.
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) -> Result<(), MimicError> {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, MimicError> {
        std::fs::read(path).map_err(|e| MimicError::Io(format!("{}: {e}", path.display())))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), MimicError> {
        std::fs::write(path, contents).map_err(|e| MimicError::Io(format!("{}: {e}", path.display())))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), MimicError> {
        std::fs::rename(from, to).map_err(|e| MimicError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), MimicError> {
        std::fs::create_dir_all(path).map_err(|e| MimicError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), MimicError> {
        std::fs::remove_file(path).map_err(|e| MimicError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(MonotonicClock),
            file_system: Arc::new(ProductionFileSystem),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// A clock that never blocks: sleeping jumps straight to the deadline.
#[derive(Clone)]
pub struct FakeClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn elapsed(&self) -> Duration {
        *locked(&self.elapsed)
    }

    pub fn advance(&self, by: Duration) {
        *locked(&self.elapsed) += by;
    }

    /// Every deadline slept until, as an offset from the origin.
    pub fn sleeps(&self) -> Vec<Duration> {
        locked(&self.sleeps).clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep_until(&self, deadline: Instant) -> Result<(), MimicError> {
        let offset = deadline.saturating_duration_since(self.origin);
        locked(&self.sleeps).push(offset);
        let mut elapsed = locked(&self.elapsed);
        if offset > *elapsed {
            *elapsed = offset;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<MimicError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        let fs = Self::default();
        locked(&fs.files).insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: MimicError) {
        *locked(&self.fail_next) = Some(error);
    }

    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        locked(&self.files).get(path).cloned()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        locked(&self.dirs).clone()
    }

    fn maybe_fail(&self) -> Result<(), MimicError> {
        if let Some(err) = locked(&self.fail_next).take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>, MimicError> {
        self.maybe_fail()?;
        locked(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| MimicError::Io(format!("missing file {}", path.display())))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<(), MimicError> {
        self.maybe_fail()?;
        locked(&self.files).insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), MimicError> {
        self.maybe_fail()?;
        let mut files = locked(&self.files);
        let contents = files
            .remove(from)
            .ok_or_else(|| MimicError::Io(format!("missing file {}", from.display())))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), MimicError> {
        self.maybe_fail()?;
        locked(&self.dirs).push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), MimicError> {
        self.maybe_fail()?;
        locked(&self.files).remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        locked(&self.files).contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_jumps_to_deadlines_and_records_them() {
        let clock = FakeClock::new();
        let start = clock.now();
        clock
            .sleep_until(start + Duration::from_millis(30))
            .expect("sleep");
        clock
            .sleep_until(start + Duration::from_millis(10))
            .expect("sleep");
        assert_eq!(clock.elapsed(), Duration::from_millis(30));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(30), Duration::from_millis(10)]
        );
    }

    #[test]
    fn fake_file_system_renames_and_fails_on_demand() {
        let fs = FakeFileSystem::with_file("/tmp/a", b"one".to_vec());
        fs.rename(Path::new("/tmp/a"), Path::new("/tmp/b"))
            .expect("rename");
        assert!(!fs.exists(Path::new("/tmp/a")));
        assert_eq!(fs.read_to_string(Path::new("/tmp/b")).expect("read"), "one");

        fs.set_fail_next(MimicError::Io("disk full".to_string()));
        assert!(fs.write(Path::new("/tmp/c"), b"x").is_err());
        assert!(fs.write(Path::new("/tmp/c"), b"x").is_ok());
    }
}
