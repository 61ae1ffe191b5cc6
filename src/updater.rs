//! Per-strip smoothing and streaming loop

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::watch,
    time::{Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    color::{self, Color, Correction},
    models::{Configuration, Strip, StripKey},
    pause::PauseFlag,
    transport::{self, Connector, DeviceConnector, Transport, TransportError},
};

mod target;
pub use target::TargetFrame;

/// Delay before every connection attempt
pub const REOPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Connection state of a strip
pub enum Link {
    Connected(Box<dyn Transport>),
    Disconnected,
}

impl Default for Link {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Link {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Blank the strip and drop the transport, if any
    async fn close(&mut self) {
        if let Self::Connected(transport) = std::mem::take(self) {
            transport::close(transport).await;
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected(transport) => f
                .debug_tuple("Connected")
                .field(&transport.led_count())
                .finish(),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Build the tick interval of a configuration
fn updater_for(config: &Configuration) -> Interval {
    let mut interval = tokio::time::interval(config.frame_interval());
    // A late tick is dropped instead of being replayed in a burst
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Blend the target into the displayed colors and stream the result
async fn push_frame(
    transport: &mut dyn Transport,
    target: &TargetFrame,
    displayed: &mut [Color],
    factor: f32,
) -> Result<(), TransportError> {
    for (index, shown) in displayed.iter_mut().enumerate() {
        *shown = color::lerp(target.get(index), *shown, factor);
        transport.write(index, *shown).await?;
    }

    transport.flush().await
}

/// Drives one strip: smooths its target colors and pushes them to its transport
pub struct StripUpdater<C = DeviceConnector> {
    key: StripKey,
    strip: Strip,
    lerp: f32,
    target: Arc<TargetFrame>,
    displayed: Vec<Color>,
    link: Link,
    connector: C,
    pause: PauseFlag,
    backoff: Duration,
}

impl<C: Connector> StripUpdater<C> {
    pub fn new(strip: Strip, lerp: f32, connector: C, pause: PauseFlag) -> Self {
        let target = Arc::new(TargetFrame::new(strip.leds, Correction::from(&strip)));

        Self {
            key: strip.key(),
            lerp,
            target,
            displayed: vec![Color::default(); strip.leds],
            link: Link::Disconnected,
            connector,
            pause,
            backoff: REOPEN_BACKOFF,
            strip,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn key(&self) -> &StripKey {
        &self.key
    }

    /// Write surface of the capture collaborator
    pub fn target(&self) -> &Arc<TargetFrame> {
        &self.target
    }

    pub fn displayed(&self) -> &[Color] {
        &self.displayed
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Check if `strip` can be applied without restarting this updater
    pub fn accepts(&self, strip: &Strip) -> bool {
        strip.key() == self.key && strip.leds == self.strip.leds
    }

    /// Apply new strip parameters and blend factor
    pub fn reconfigure(&mut self, strip: &Strip, lerp: f32) {
        if !self.accepts(strip) {
            warn!(strip = %self.key, "ignoring incompatible strip settings");
            return;
        }

        self.target.set_correction(Correction::from(strip));
        self.strip = strip.clone();
        self.lerp = lerp;
    }

    /// Run one refresh of the strip
    pub async fn tick(&mut self) {
        if self.pause.is_paused() {
            if self.link.is_connected() {
                debug!(strip = %self.key, "paused, turning strip off");
                self.link.close().await;
            }

            return;
        }

        let Link::Connected(transport) = &mut self.link else {
            debug!(strip = %self.key, "strip is disconnected");
            self.reopen().await;
            return;
        };

        let result = push_frame(
            transport.as_mut(),
            &self.target,
            &mut self.displayed,
            self.lerp,
        )
        .await;

        if let Err(error) = result {
            error!(strip = %self.key, error = %error, "strip update failed");
            // The link is broken, drop it without trying to blank the strip
            self.link = Link::Disconnected;
            self.reopen().await;
        }
    }

    /// Connect to the strip, retrying forever
    ///
    /// Every attempt is preceded by the backoff delay.
    pub async fn reopen(&mut self) {
        self.link = Link::Disconnected;
        let mut attempt: u64 = 0;

        loop {
            tokio::time::sleep(self.backoff).await;
            attempt += 1;

            match self.connector.open(&self.strip).await {
                Ok(transport) => {
                    info!(strip = %self.key, attempt, "strip connected");
                    self.link = Link::Connected(transport);
                    return;
                }
                Err(error) => {
                    if attempt == 1 {
                        warn!(strip = %self.key, error = %error, "cannot open strip, will keep trying");
                    } else {
                        debug!(strip = %self.key, attempt, error = %error, "cannot open strip");
                    }
                }
            }
        }
    }

    /// Apply the settings this updater finds in `config`
    fn apply(&mut self, config: &Configuration) {
        if let Some(strip) = config.strip(&self.key) {
            if strip != &self.strip || config.lerp != self.lerp {
                debug!(strip = %self.key, "applying new strip settings");
                self.reconfigure(strip, config.lerp);
            }
        }
    }

    /// Drive the strip at the configured refresh rate until `shutdown` is cancelled
    ///
    /// Configuration snapshots received on `config` are applied between ticks. The strip is
    /// turned off before returning.
    #[instrument(skip_all, fields(strip = %self.key))]
    pub async fn run(
        mut self,
        mut config: watch::Receiver<Arc<Configuration>>,
        shutdown: CancellationToken,
    ) {
        let mut fps = config.borrow().fps;
        let mut interval = updater_for(&config.borrow());

        // While paused, the first active tick connects instead
        if !self.pause.is_paused() {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    return;
                }
                _ = self.reopen() => {}
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                changed = config.changed() => {
                    if changed.is_err() {
                        // No more configuration updates: the supervisor is gone
                        break;
                    }

                    let snapshot = config.borrow_and_update().clone();
                    self.apply(&snapshot);

                    if snapshot.fps != fps {
                        fps = snapshot.fps;
                        interval = updater_for(&snapshot);
                    }
                }
                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            break;
                        }
                        _ = self.tick() => {}
                    }
                }
            }
        }

        self.link.close().await;
        info!("strip updater stopped");
    }
}

impl<C> std::fmt::Debug for StripUpdater<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripUpdater")
            .field("key", &self.key)
            .field("link", &self.link)
            .finish()
    }
}
