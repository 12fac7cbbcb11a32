//! Domain types shared by every FTL crate: how a snapshot line becomes a
//! tracked position, how size changes are classified and how a change turns
//! into a replica order.

mod change;
mod order;
mod position;

pub use change::{classify, ChangeEvent, ChangeKind};
pub use order::{to_order, ReplicaOrder};
pub use position::{Direction, PositionKey, PositionRecord, RawEntry};
