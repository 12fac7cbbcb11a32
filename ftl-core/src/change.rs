use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::{to_order, ReplicaOrder};
use crate::PositionRecord;

/// How a position's size moved between two consecutive polls.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Opened,
    AddedTo,
    PartiallyClosed,
    Closed,
    Unchanged,
}

impl ChangeKind {
    /// Whether mirroring this change means shrinking an existing position.
    pub fn is_reduction(self) -> bool {
        matches!(self, Self::Closed | Self::PartiallyClosed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::AddedTo => "added to",
            Self::PartiallyClosed => "partially closed",
            Self::Closed => "closed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the move from `previous` to `current` magnitude.
///
/// Both values are non-negative sizes. Comparison is exact: both sides come
/// from the same upstream decimal representation.
pub fn classify(previous: Decimal, current: Decimal) -> ChangeKind {
    if previous.is_zero() {
        ChangeKind::Opened
    } else if previous > current {
        if current.is_zero() {
            ChangeKind::Closed
        } else {
            ChangeKind::PartiallyClosed
        }
    } else if previous < current {
        ChangeKind::AddedTo
    } else {
        ChangeKind::Unchanged
    }
}

/// A classified position change emitted by the tracker.
///
/// The kind lives on the record itself. `position.previous_magnitude` holds
/// the size recorded on the preceding poll and `position.magnitude` the size
/// observed now (zero for closes).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub position: PositionRecord,
}

impl ChangeEvent {
    pub fn new(position: PositionRecord) -> Self {
        Self { position }
    }

    pub fn kind(&self) -> ChangeKind {
        self.position.kind
    }

    /// Translate the change into the order that mirrors it.
    pub fn to_order(&self) -> ReplicaOrder {
        to_order(self)
    }
}
