// Rotating activity log for pipeline runs, one timestamped file per
// rotation window.

use chrono::Utc;
use log::error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ActivityLog {
    dir: PathBuf,
    rotate_every: Duration,
    current: Mutex<Option<(PathBuf, Instant)>>,
}

impl ActivityLog {
    pub fn new(dir: PathBuf, rotate_every: Duration) -> Self {
        Self {
            dir,
            rotate_every,
            current: Mutex::new(None),
        }
    }

    fn fresh_path(dir: &Path) -> PathBuf {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        dir.join(format!("activitylog-{}.txt", stamp))
    }

    fn current_path(&self) -> PathBuf {
        let mut guard = match self.current.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let reusable = guard
            .as_ref()
            .filter(|(_, opened)| opened.elapsed() < self.rotate_every)
            .map(|(path, _)| path.clone());
        match reusable {
            Some(path) => path,
            None => {
                let path = Self::fresh_path(&self.dir);
                *guard = Some((path.clone(), Instant::now()));
                path
            }
        }
    }

    /// Append one line, prefixed with the current time. Logging failures
    /// are reported but never fail the pipeline.
    pub fn append(&self, line: &str) {
        let path = self.current_path();
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!("Failed to create activity log directory: {}", e);
            return;
        }
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut f) => {
                let stamped = format!("[{}] {}\n", Utc::now().format("%+"), line);
                if let Err(e) = f.write_all(stamped.as_bytes()) {
                    error!("Failed to write activity log: {}", e);
                }
            }
            Err(e) => error!("Failed to open activity log {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_within_one_file() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().to_path_buf(), Duration::from_secs(300));
        log.append("cycle started");
        log.append("scanner finished");

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);

        let content =
            std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
        assert!(content.contains("cycle started"));
        assert!(content.contains("scanner finished"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn rotation_opens_a_new_file() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::new(dir.path().to_path_buf(), Duration::from_millis(1));
        log.append("first window");
        std::thread::sleep(Duration::from_millis(5));
        log.append("second window");

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
    }
}
