//! Interfaces between the change-tracking core and the services that deliver
//! position snapshots.

mod limiter;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ftl_core::RawEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use governor::Quota;
pub use limiter::RateLimiter;

/// Identifier of a tracked account as understood by its snapshot source.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Full list of open positions reported by one successful poll.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: Vec<RawEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(entries: Vec<RawEntry>) -> Self {
        Self {
            entries,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result alias for snapshot source calls.
pub type SourceResult<T> = Result<T, SourceError>;

/// Why a poll produced no snapshot.
///
/// A failed poll must never be mistaken for an empty position list, so every
/// failure mode surfaces here instead of as an empty [`Snapshot`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// The upstream answered 429.
    #[error("request budget exhausted")]
    RateLimited,
}

impl SourceError {
    /// Whether retrying on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited => true,
            Self::BadStatus { status, .. } => *status >= 500,
            Self::Rejected { .. } | Self::Decode(_) => false,
        }
    }
}

/// Delivers position snapshots for tracked accounts.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Fetch the complete list of positions `account` currently holds.
    async fn fetch_snapshot(&self, account: &AccountId) -> SourceResult<Snapshot>;
}
