//! Hot-reloaded configuration file

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};

use crate::models::{ConfigError, Configuration, CONFIG_FILE_NAME};

mod watcher;
pub use watcher::{ChangeSender, DirectoryWatcher, NotifyWatcher};

/// Number of immediate retries before a rejected configuration is retried on a timer
const ACCEPT_YIELDS: u32 = 16;
/// Delay between retries of a rejected configuration
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot watch {}: {source}", .path.display())]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

type Callback = Box<dyn FnMut(Arc<Configuration>) -> bool + Send>;
type Snapshot = Option<Arc<Configuration>>;

struct Reloader {
    path: PathBuf,
    callback: Callback,
    snapshot: watch::Sender<Snapshot>,
}

impl Reloader {
    /// Read and publish the configuration file
    ///
    /// Returns `false` if the file does not exist.
    async fn reload(&mut self) -> Result<bool, ConfigError> {
        let config = match Configuration::load_file(&self.path).await {
            Ok(config) => Arc::new(config),
            Err(ConfigError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no configuration file");
                return Ok(false);
            }
            Err(error) => {
                return Err(error);
            }
        };

        self.publish(config).await;
        Ok(true)
    }

    /// Hand `config` to the callback until it is accepted
    async fn publish(&mut self, config: Arc<Configuration>) {
        let mut attempt = 0;

        while !(self.callback)(config.clone()) {
            attempt += 1;

            if attempt < ACCEPT_YIELDS {
                tokio::task::yield_now().await;
            } else {
                if attempt == ACCEPT_YIELDS {
                    debug!("configuration not accepted yet, retrying");
                }

                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }

        info!(path = %self.path.display(), strips = config.strips.len(), "loaded configuration");
        self.snapshot.send_replace(Some(config));
    }
}

/// Background task reloading the configuration when its file changes
async fn watch_loop(
    mut changes: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    reloader: Arc<Mutex<Reloader>>,
    path: PathBuf,
) {
    while let Some(paths) = changes.recv().await {
        let mut relevant = paths.contains(&path);

        // Editors often emit several events for one save
        while let Ok(paths) = changes.try_recv() {
            relevant |= paths.contains(&path);
        }

        if !relevant {
            trace!(paths = ?paths, "ignoring unrelated changes");
            continue;
        }

        if let Err(error) = reloader.lock().await.reload().await {
            error!(path = %path.display(), error = %error, "failed to reload configuration");
        }
    }

    debug!("configuration watcher stopped");
}

/// Owner of the current configuration snapshot
///
/// The configuration file is watched for changes, and every valid version of it is passed to
/// the registered callback. Invalid versions are logged and ignored, so the last accepted
/// configuration stays in effect.
pub struct ConfigurationStore {
    path: PathBuf,
    reloader: Arc<Mutex<Reloader>>,
    snapshot: watch::Receiver<Snapshot>,
    watcher: Option<Box<dyn DirectoryWatcher>>,
    task: Option<JoinHandle<()>>,
}

impl ConfigurationStore {
    /// Watch `config.json` in the current directory
    pub async fn new(
        callback: impl FnMut(Arc<Configuration>) -> bool + Send + 'static,
    ) -> Result<Self, StoreError> {
        let dir = std::env::current_dir().map_err(|source| StoreError::Directory {
            path: PathBuf::from("."),
            source,
        })?;

        Self::with_watcher(dir, NotifyWatcher::new(), callback).await
    }

    /// Watch `config.json` in `dir` using `watcher`
    ///
    /// The configuration is loaded once before returning, if it exists.
    pub async fn with_watcher(
        dir: impl AsRef<Path>,
        mut watcher: impl DirectoryWatcher + 'static,
        callback: impl FnMut(Arc<Configuration>) -> bool + Send + 'static,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let dir = tokio::fs::canonicalize(dir)
            .await
            .map_err(|source| StoreError::Directory {
                path: dir.to_owned(),
                source,
            })?;
        let path = dir.join(CONFIG_FILE_NAME);

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        watcher
            .start(&dir, changes_tx)
            .map_err(|source| StoreError::WatchSetup {
                path: dir.clone(),
                source,
            })?;

        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let reloader = Arc::new(Mutex::new(Reloader {
            path: path.clone(),
            callback: Box::new(callback),
            snapshot: snapshot_tx,
        }));

        if let Err(error) = reloader.lock().await.reload().await {
            error!(path = %path.display(), error = %error, "failed to load configuration");
        }

        let task = tokio::spawn(watch_loop(changes_rx, reloader.clone(), path.clone()));

        Ok(Self {
            path,
            reloader,
            snapshot: snapshot_rx,
            watcher: Some(Box::new(watcher)),
            task: Some(task),
        })
    }

    /// Path of the watched configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last accepted configuration
    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified of every accepted configuration
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Configuration>>> {
        self.snapshot.clone()
    }

    /// Read the configuration file again
    ///
    /// Returns `false` if the file does not exist. On error, the previous configuration is kept.
    pub async fn reload(&self) -> Result<bool, ConfigError> {
        self.reloader.lock().await.reload().await
    }

    /// Stop watching the configuration file
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if self.watcher.take().is_some() {
            debug!(path = %self.path.display(), "closed configuration store");
        }
    }
}

impl Drop for ConfigurationStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("path", &self.path)
            .field("open", &self.task.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Watcher whose events are sent by the test
    #[derive(Clone, Default)]
    struct ChannelWatcher(Arc<std::sync::Mutex<Option<ChangeSender>>>);

    impl ChannelWatcher {
        fn touch(&self, path: PathBuf) -> bool {
            match &*self.0.lock().unwrap() {
                Some(changes) => changes.send(vec![path]).is_ok(),
                None => false,
            }
        }
    }

    impl DirectoryWatcher for ChannelWatcher {
        fn start(&mut self, _dir: &Path, changes: ChangeSender) -> Result<(), notify::Error> {
            *self.0.lock().unwrap() = Some(changes);
            Ok(())
        }
    }

    struct FailingWatcher;

    impl DirectoryWatcher for FailingWatcher {
        fn start(&mut self, _dir: &Path, _changes: ChangeSender) -> Result<(), notify::Error> {
            Err(notify::Error::generic("watch limit reached"))
        }
    }

    /// Callback accepting everything after `rejections` refusals
    #[derive(Clone, Default)]
    struct Accept {
        calls: Arc<AtomicUsize>,
        rejections: usize,
    }

    impl Accept {
        fn rejecting(rejections: usize) -> Self {
            Self {
                rejections,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn callback(&self) -> impl FnMut(Arc<Configuration>) -> bool + Send + 'static {
            let this = self.clone();
            move |_| this.calls.fetch_add(1, Ordering::SeqCst) >= this.rejections
        }
    }

    fn config(fps: u32) -> serde_json::Value {
        serde_json::json!({
            "strips": [{
                "type": "network",
                "ip": "127.0.0.1",
                "port": 5163,
                "leds": 10,
                "segments": [],
                "maxBrightness": 765,
                "reductionR": 1.0,
                "reductionG": 1.0,
                "reductionB": 1.0
            }],
            "ups": 30,
            "fps": fps,
            "lerp": 0.5
        })
    }

    fn write(dir: &Path, value: &serde_json::Value) {
        std::fs::write(dir.join(CONFIG_FILE_NAME), value.to_string()).unwrap();
    }

    #[tokio::test]
    async fn initial_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &config(60));
        let accept = Accept::default();

        let store =
            ConfigurationStore::with_watcher(dir.path(), ChannelWatcher::default(), accept.callback())
                .await
                .unwrap();

        assert_eq!(accept.calls(), 1);
        assert_eq!(store.current().unwrap().fps, 60);
        assert!(store.path().ends_with(CONFIG_FILE_NAME));
    }

    #[tokio::test]
    async fn missing_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let accept = Accept::default();

        let store =
            ConfigurationStore::with_watcher(dir.path(), ChannelWatcher::default(), accept.callback())
                .await
                .unwrap();

        assert!(store.current().is_none());
        assert!(!store.reload().await.unwrap());
        assert_eq!(accept.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_file_keeps_previous_configuration() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &config(60));
        let accept = Accept::default();

        let store =
            ConfigurationStore::with_watcher(dir.path(), ChannelWatcher::default(), accept.callback())
                .await
                .unwrap();

        let mut broken = config(30);
        broken.as_object_mut().unwrap().remove("fps");
        write(dir.path(), &broken);

        assert!(matches!(store.reload().await, Err(ConfigError::Json(_))));
        assert_eq!(store.current().unwrap().fps, 60);

        let mut invalid = config(30);
        invalid["strips"][0]["segments"] = serde_json::json!([{
            "offset": 5, "length": 6, "display": 0,
            "x": 0, "y": 0, "width": 10, "height": 10,
            "steps": 1, "orientation": true, "invert": false
        }]);
        write(dir.path(), &invalid);

        assert!(matches!(
            store.reload().await,
            Err(ConfigError::SegmentOutOfBounds { .. })
        ));
        assert_eq!(store.current().unwrap().fps, 60);
        assert_eq!(accept.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_configuration_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &config(60));
        let accept = Accept::rejecting(20);

        let store =
            ConfigurationStore::with_watcher(dir.path(), ChannelWatcher::default(), accept.callback())
                .await
                .unwrap();

        assert_eq!(accept.calls(), 21);
        assert!(store.current().is_some());
    }

    #[tokio::test]
    async fn watch_setup_failure() {
        let dir = tempfile::tempdir().unwrap();

        let result =
            ConfigurationStore::with_watcher(dir.path(), FailingWatcher, Accept::default().callback())
                .await;

        assert!(matches!(result, Err(StoreError::WatchSetup { .. })));
    }

    #[tokio::test]
    async fn change_event_reloads() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), &config(60));
        let watcher = ChannelWatcher::default();
        let accept = Accept::default();

        let store = ConfigurationStore::with_watcher(dir.path(), watcher.clone(), accept.callback())
            .await
            .unwrap();
        let mut snapshots = store.subscribe();

        write(dir.path(), &config(30));
        assert!(watcher.touch(store.path().with_file_name("other.json")));
        assert!(watcher.touch(store.path().to_owned()));

        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|config| config.as_ref().map_or(false, |c| c.fps == 30)),
        )
        .await
        .expect("configuration was not reloaded")
        .unwrap();

        assert_eq!(accept.calls(), 2);
        assert_eq!(store.current().unwrap().fps, 30);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = ChannelWatcher::default();

        let mut store = ConfigurationStore::with_watcher(
            dir.path(),
            watcher.clone(),
            Accept::default().callback(),
        )
        .await
        .unwrap();

        store.close();
        store.close();

        // Let the aborted watch loop drop its receiver
        tokio::time::timeout(Duration::from_secs(5), async {
            while watcher.touch(store.path().to_owned()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watch loop still running after close");
    }
}
