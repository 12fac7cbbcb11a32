//! Binance futures leaderboard connector.
//!
//! [`LeaderboardClient`] polls the public leaderboard endpoints and exposes
//! them as a [`ftl_broker::SnapshotSource`].

mod client;
pub mod types;

pub use client::{LeaderboardClient, LeaderboardConfig, DEFAULT_BASE_URL, DEFAULT_HEADERS};
pub use types::{NicknameDetails, UserBaseInfo};
