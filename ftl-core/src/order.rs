use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChangeEvent, ChangeKind, Direction};

/// Order that reproduces an observed change on a follower account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicaOrder {
    pub ticker: String,
    pub direction: Direction,
    pub magnitude: Decimal,
    pub reduce_only: bool,
    /// Leverage the leader holds the position with.
    pub leverage: u32,
}

/// Build the replica order for a classified change.
///
/// Reductions are expressed as reduce-only orders on the opposite side, sized
/// by how much the position shrank. Additions are sized by the increment.
pub fn to_order(change: &ChangeEvent) -> ReplicaOrder {
    let position = &change.position;
    let mut order = ReplicaOrder {
        ticker: position.ticker.clone(),
        direction: position.direction,
        magnitude: position.magnitude,
        reduce_only: false,
        leverage: position.leverage,
    };

    if change.kind().is_reduction() {
        order.reduce_only = true;
        order.direction = position.direction.opposite();
    }

    match change.kind() {
        ChangeKind::Closed => order.magnitude = position.previous_magnitude,
        ChangeKind::PartiallyClosed => {
            order.magnitude = position.previous_magnitude - position.magnitude
        }
        ChangeKind::AddedTo => order.magnitude = position.magnitude - position.previous_magnitude,
        ChangeKind::Opened | ChangeKind::Unchanged => {}
    }

    order
}
