//! Polls the program source between passes so `--watch` can hot-reload it.
//!
//! The scheduler is single threaded and only reloads between passes, so
//! polling from the run loop is enough; no watcher thread is involved.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, trace};

pub struct SourceWatcher {
    path: PathBuf,
    interval: Duration,
    last_check: Instant,
    modified: Option<SystemTime>,
    len: u64,
    contents: String,
}

impl SourceWatcher {
    /// Start watching `path`, taking `contents` as the version already loaded.
    pub fn new(path: &Path, contents: String, interval: Duration) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(SourceWatcher {
            path: path.to_path_buf(),
            interval,
            last_check: Instant::now(),
            modified: metadata.modified().ok(),
            len: metadata.len(),
            contents,
        })
    }

    /// Check for a new version if the poll interval has elapsed.
    pub fn poll(&mut self) -> io::Result<Option<String>> {
        if self.last_check.elapsed() < self.interval {
            return Ok(None);
        }
        self.last_check = Instant::now();
        self.check()
    }

    /// Returns the new source text if the file changed since the last check.
    pub fn check(&mut self) -> io::Result<Option<String>> {
        let metadata = std::fs::metadata(&self.path)?;
        let modified = metadata.modified().ok();
        if modified == self.modified && metadata.len() == self.len {
            trace!(path = %self.path.display(), "source unchanged");
            return Ok(None);
        }
        self.modified = modified;
        self.len = metadata.len();

        let contents = std::fs::read_to_string(&self.path)?;
        if contents == self.contents {
            return Ok(None);
        }
        debug!(path = %self.path.display(), "source changed");
        self.contents = contents.clone();
        Ok(Some(contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_file_reports_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prog.when");
        std::fs::write(&path, "main:\n    exit\n").expect("write");
        let mut watcher =
            SourceWatcher::new(&path, "main:\n    exit\n".to_string(), Duration::ZERO).expect("watch");
        assert_eq!(watcher.check().expect("check"), None);
    }

    #[test]
    fn edits_are_reported_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prog.when");
        std::fs::write(&path, "main:\n    exit\n").expect("write");
        let mut watcher =
            SourceWatcher::new(&path, "main:\n    exit\n".to_string(), Duration::ZERO).expect("watch");

        let edited = "fo t:\n    pass\nmain:\n    t.start()\n";
        std::fs::write(&path, edited).expect("write");
        assert_eq!(watcher.poll().expect("poll").as_deref(), Some(edited));
        assert_eq!(watcher.poll().expect("poll"), None);
    }

    #[test]
    fn poll_waits_for_interval() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prog.when");
        std::fs::write(&path, "main:\n    exit\n").expect("write");
        let mut watcher = SourceWatcher::new(&path, "main:\n    exit\n".to_string(), Duration::from_secs(3600))
            .expect("watch");
        std::fs::write(&path, "main:\n    break\n").expect("write");
        assert_eq!(watcher.poll().expect("poll"), None);
        assert!(watcher.check().expect("check").is_some());
    }

    #[test]
    fn removed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("prog.when");
        std::fs::write(&path, "main:\n    exit\n").expect("write");
        let mut watcher =
            SourceWatcher::new(&path, String::new(), Duration::ZERO).expect("watch");
        std::fs::remove_file(&path).expect("remove");
        assert!(watcher.check().is_err());
    }
}
