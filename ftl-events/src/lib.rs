use chrono::{DateTime, Utc};
use ftl_broker::{AccountId, SourceError};
use ftl_core::ChangeEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    pub account: AccountId,
    pub change: ChangeEvent,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollFailure {
    pub account: AccountId,
    pub error: String,
    pub transient: bool,
    pub observed_at: DateTime<Utc>,
}

impl PollFailure {
    pub fn new(account: AccountId, error: &SourceError) -> Self {
        Self {
            account,
            error: error.to_string(),
            transient: error.is_transient(),
            observed_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Change(ChangeNotice),
    PollFailed(PollFailure),
}

impl FeedEvent {
    pub fn change(account: AccountId, change: ChangeEvent) -> Self {
        Self::Change(ChangeNotice {
            account,
            change,
            observed_at: Utc::now(),
        })
    }

    pub fn account(&self) -> &AccountId {
        match self {
            Self::Change(notice) => &notice.account,
            Self::PollFailed(failure) => &failure.account,
        }
    }
}

/// Producer half of the feed. Clone one handle per account poller.
///
/// The channel is bounded: `publish` waits for room instead of dropping
/// events, and events from one handle arrive in publish order.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: mpsc::Sender<FeedEvent>,
}

impl EventBus {
    pub fn channel(capacity: usize) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, EventStream { receiver })
    }

    /// Returns `false` once the consumer has gone away.
    pub async fn publish(&self, event: FeedEvent) -> bool {
        self.sender.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<FeedEvent>,
}

impl EventStream {
    /// Next event, or `None` after every [`EventBus`] handle is dropped.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}
