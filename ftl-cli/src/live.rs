use std::sync::Arc;
use std::time::Duration;

use ftl_broker::{AccountId, SnapshotSource};
use ftl_events::{EventBus, FeedEvent, PollFailure};
use ftl_tracker::PositionTracker;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::telemetry::LiveMetrics;

/// Cooperative stop flag shared by every task of the live runtime.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls one account on a fixed interval and feeds its changes to the bus.
pub struct AccountPoller {
    account: AccountId,
    label: String,
    tracker: PositionTracker,
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    bus: EventBus,
    metrics: Option<Arc<LiveMetrics>>,
}

impl AccountPoller {
    pub fn new(
        account: AccountId,
        source: Arc<dyn SnapshotSource>,
        interval: Duration,
        bus: EventBus,
    ) -> Self {
        Self {
            label: account.to_string(),
            tracker: PositionTracker::new(account.as_str()),
            account,
            source,
            interval,
            bus,
            metrics: None,
        }
    }

    /// Name used in log lines instead of the raw uid, tracker output included.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        let span = info_span!("position_tracker", account = %self.label, uid = %self.account);
        self.tracker = self.tracker.with_span(span);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LiveMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Run one fetch and publish what it produced.
    ///
    /// A failed fetch publishes `PollFailed` and leaves the tracker as it was,
    /// so an outage is never read as every position closing. Returns `false`
    /// once the consumer has gone away.
    pub async fn poll_once(&mut self) -> bool {
        match self.source.fetch_snapshot(&self.account).await {
            Ok(snapshot) => {
                let changes = self.tracker.update(snapshot.entries);
                if let Some(metrics) = &self.metrics {
                    metrics.record_poll(self.account.as_str(), self.tracker.len());
                }
                debug!(changes = changes.len(), tracked = self.tracker.len(), "poll complete");
                for change in changes {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_change(self.account.as_str(), change.kind());
                    }
                    if !self
                        .bus
                        .publish(FeedEvent::change(self.account.clone(), change))
                        .await
                    {
                        return false;
                    }
                }
                true
            }
            Err(err) => {
                warn!(
                    source = self.source.name(),
                    error = %err,
                    transient = err.is_transient(),
                    "snapshot poll failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_failed_poll(self.account.as_str());
                }
                self.bus
                    .publish(FeedEvent::PollFailed(PollFailure::new(
                        self.account.clone(),
                        &err,
                    )))
                    .await
            }
        }
    }

    /// Poll until `shutdown` fires or the consumer disconnects.
    pub async fn run(mut self, shutdown: ShutdownSignal) {
        let span = info_span!("poller", account = %self.label);
        async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = self.interval.as_millis() as u64, "poller started");
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        if !self.poll_once().await {
                            info!("event consumer closed");
                            break;
                        }
                    }
                }
            }
            info!("poller stopped");
        }
        .instrument(span)
        .await
    }
}

/// One task per followed account, stopped together.
pub struct LiveRuntime {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveRuntime {
    pub fn start(pollers: Vec<AccountPoller>, shutdown: ShutdownSignal) -> Self {
        let tasks = pollers
            .into_iter()
            .map(|poller| tokio::spawn(poller.run(shutdown.clone())))
            .collect();
        Self { shutdown, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for every poller to exit.
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(err) = result {
                warn!(error = %err, "poller task failed");
            }
        }
    }
}
