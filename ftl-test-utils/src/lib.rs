//! Test doubles for exercising FTL end to end without touching the network.

mod leaderboard;
mod source;

use ftl_core::RawEntry;
use rust_decimal::Decimal;

pub use leaderboard::{
    MockLeaderboard, MockLeaderboardConfig, ProfileFixture, RecordedRequest, ScriptedResponse,
    API_PREFIX, SHUTDOWN_GRACE,
};
pub use source::{ScriptedPoll, ScriptedSource};

/// Snapshot line with fixed prices and a signed `amount`.
pub fn entry(symbol: &str, amount: Decimal) -> RawEntry {
    RawEntry {
        symbol: symbol.to_string(),
        entry_price: Decimal::new(1886, 3),
        mark_price: Decimal::new(185_843_264, 8),
        pnl: Decimal::new(-24_882_299_136, 8),
        roe: Decimal::new(-2_261_789, 8),
        amount,
        leverage: 2,
        update_timestamp: Some(1_667_674_507_457),
    }
}
