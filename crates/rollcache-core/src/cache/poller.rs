//! Periodic refresh driver.
//!
//! Refreshes once on start, then on every interval tick while the surface is
//! visible. Ticks stop while hidden; regaining visibility refreshes right
//! away and restarts the interval from that moment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::AttendanceStore;

/// Polling never runs faster than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(15_000);

/// A poll interval, clamped to `MIN_POLL_INTERVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval(Duration);

impl PollInterval {
    pub fn new(requested: Duration) -> Self {
        if requested < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = requested.as_millis() as u64,
                min_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval below minimum, clamping"
            );
            Self(MIN_POLL_INTERVAL)
        } else {
            Self(requested)
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn get(&self) -> Duration {
        self.0
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self(MIN_POLL_INTERVAL)
    }
}

pub struct Poller {
    store: Arc<AttendanceStore>,
    interval: PollInterval,
}

impl Poller {
    pub fn new(store: Arc<AttendanceStore>, interval: PollInterval) -> Self {
        Self { store, interval }
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn start(self) -> PollerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        PollerHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut visibility = self.store.visibility().watch();
        let mut ticker = tokio::time::interval(self.interval.get());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.get().as_millis() as u64, "Poller started");

        loop {
            let visible = *visibility.borrow_and_update();

            tokio::select! {
                _ = ticker.tick(), if visible => {
                    self.poll().await;
                }
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *visibility.borrow_and_update() {
                        debug!("Surface visible again, refreshing now");
                        ticker.reset();
                        self.poll().await;
                    } else {
                        debug!("Surface hidden, pausing polling");
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Poller stopped");
    }

    async fn poll(&self) {
        let outcome = self.store.refresh().await;
        debug!(?outcome, "Poll complete");
    }
}

/// Running poller. Dropping the handle without `stop` leaves the task
/// running until the runtime shuts down.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the loop to exit and wait for it. An in-progress refresh is
    /// allowed to finish first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Poller task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
