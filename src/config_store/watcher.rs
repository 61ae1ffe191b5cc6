use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Channel receiving the paths touched by each batch of file system events
pub type ChangeSender = mpsc::UnboundedSender<Vec<PathBuf>>;

/// Source of change notifications for a directory
pub trait DirectoryWatcher: Send {
    /// Start watching `dir` (non-recursively), sending changed paths to `changes`
    fn start(&mut self, dir: &Path, changes: ChangeSender) -> Result<(), notify::Error>;
}

/// [DirectoryWatcher] backed by the platform notification API
#[derive(Default)]
pub struct NotifyWatcher {
    inner: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectoryWatcher for NotifyWatcher {
    fn start(&mut self, dir: &Path, changes: ChangeSender) -> Result<(), notify::Error> {
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                // Editors saving through a rename produce a create event
                Ok(Event {
                    kind: EventKind::Modify(_) | EventKind::Create(_),
                    paths,
                    ..
                }) => {
                    // The receiver is gone once the store is closed
                    changes.send(paths).ok();
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "file watch error");
                }
            }
        })?;

        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(path = %dir.display(), "watching directory");

        self.inner = Some(watcher);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn reports_file_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = NotifyWatcher::new();
        watcher.start(&dir, tx).unwrap();

        let path = dir.join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(paths) = rx.recv().await {
                if paths.contains(&path) {
                    return true;
                }
            }

            false
        })
        .await;

        assert_eq!(seen.ok(), Some(true));
    }
}
