//! Set of running strip updaters

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, TryLockError},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    models::{Configuration, Strip, StripKey},
    pause::PauseFlag,
    transport::{Connector, DeviceConnector},
    updater::{StripUpdater, TargetFrame, REOPEN_BACKOFF},
};

struct StripTask {
    led_count: usize,
    target: Arc<TargetFrame>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SupervisorData<C = DeviceConnector> {
    connector: C,
    pause: PauseFlag,
    backoff: Duration,
    config_tx: Option<watch::Sender<Arc<Configuration>>>,
    strips: BTreeMap<StripKey, StripTask>,
    stopping: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl<C: Connector + Clone + 'static> SupervisorData<C> {
    pub fn new(connector: C, pause: PauseFlag) -> Self {
        Self {
            connector,
            pause,
            backoff: REOPEN_BACKOFF,
            config_tx: None,
            strips: Default::default(),
            stopping: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn wrap(self) -> Supervisor<C> {
        Supervisor(Arc::new(Mutex::new(self)))
    }

    fn spawn(
        &self,
        strip: &Strip,
        config: &Configuration,
        config_rx: watch::Receiver<Arc<Configuration>>,
        previous: Option<JoinHandle<()>>,
    ) -> StripTask {
        let updater = StripUpdater::new(
            strip.clone(),
            config.lerp,
            self.connector.clone(),
            self.pause.clone(),
        )
        .with_backoff(self.backoff);

        let target = updater.target().clone();
        let cancel = self.shutdown.child_token();

        let handle = tokio::spawn({
            let cancel = cancel.clone();

            async move {
                // The previous updater for this device must release it first
                if let Some(previous) = previous {
                    previous.await.ok();
                }

                updater.run(config_rx, cancel).await
            }
        });

        StripTask {
            led_count: strip.leds,
            target,
            cancel,
            handle,
        }
    }

    fn apply(&mut self, config: Arc<Configuration>) {
        if self.shutdown.is_cancelled() {
            debug!("ignoring configuration after shutdown");
            return;
        }

        // Running updaters pick up their new settings from here
        let config_tx = self
            .config_tx
            .get_or_insert_with(|| watch::channel(config.clone()).0);
        config_tx.send_replace(config.clone());
        let config_rx = config_tx.subscribe();

        let wanted: BTreeMap<StripKey, &Strip> = config
            .strips
            .iter()
            .map(|strip| (strip.key(), strip))
            .collect();

        let stale: Vec<StripKey> = self
            .strips
            .iter()
            .filter(|(key, task)| {
                wanted
                    .get(*key)
                    .map_or(true, |strip| strip.leds != task.led_count)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let mut restarting = BTreeMap::new();
        for key in stale {
            if let Some(task) = self.strips.remove(&key) {
                task.cancel.cancel();

                if wanted.contains_key(&key) {
                    info!(strip = %key, leds = %task.led_count, "restarting resized strip");
                    restarting.insert(key, task.handle);
                } else {
                    info!(strip = %key, "stopping removed strip");
                    self.stopping.push(task.handle);
                }
            }
        }

        for (key, strip) in wanted {
            if self.strips.contains_key(&key) {
                continue;
            }

            let previous = restarting.remove(&key);
            if previous.is_none() {
                info!(strip = %key, leds = %strip.leds, "starting strip");
            }

            let task = self.spawn(strip, &config, config_rx.clone(), previous);
            self.strips.insert(key, task);
        }

        self.stopping.retain(|handle| !handle.is_finished());
    }
}

/// Configuration callback owning one [StripUpdater] per configured strip
pub struct Supervisor<C = DeviceConnector>(Arc<Mutex<SupervisorData<C>>>);

impl<C> Clone for Supervisor<C> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<C: Connector + Clone + 'static> Supervisor<C> {
    pub fn new(connector: C, pause: PauseFlag) -> Self {
        SupervisorData::new(connector, pause).wrap()
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorData<C>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reconcile the running strips with `config`
    ///
    /// Returns `false` if the supervisor is busy, in which case the caller should try again.
    /// Must be called from within a tokio runtime.
    pub fn apply(&self, config: Arc<Configuration>) -> bool {
        let mut data = match self.0.try_lock() {
            Ok(data) => data,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        data.apply(config);
        true
    }

    /// Target colors of the strip identified by `key`
    pub fn frame(&self, key: &StripKey) -> Option<Arc<TargetFrame>> {
        self.lock().strips.get(key).map(|task| task.target.clone())
    }

    pub fn frames(&self) -> BTreeMap<StripKey, Arc<TargetFrame>> {
        self.lock()
            .strips
            .iter()
            .map(|(key, task)| (key.clone(), task.target.clone()))
            .collect()
    }

    /// Stop every strip, turning its LEDs off
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut data = self.lock();
            data.shutdown.cancel();

            let strips = std::mem::take(&mut data.strips);
            let stopping = std::mem::take(&mut data.stopping);

            strips
                .into_values()
                .map(|task| task.handle)
                .chain(stopping)
                .collect()
        };

        for result in futures::future::join_all(handles).await {
            if let Err(error) = result {
                error!(error = %error, "strip updater failed");
            }
        }

        info!("all strips stopped");
    }
}
