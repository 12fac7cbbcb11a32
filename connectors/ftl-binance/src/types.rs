use chrono::{DateTime, TimeZone, Utc};
use ftl_broker::Snapshot;
use ftl_core::RawEntry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Envelope shared by every leaderboard endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    /// `"000000"` on success.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub message_detail: Option<JsonValue>,
}

/// Payload of `getOtherPosition`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPositionData {
    /// `null` when the account has no open positions or does not share them.
    #[serde(default)]
    pub other_position_ret_list: Option<Vec<LeaderboardPosition>>,
    #[serde(default)]
    pub update_time_stamp: Option<i64>,
}

impl UserPositionData {
    pub fn into_snapshot(self) -> Snapshot {
        let entries = self
            .other_position_ret_list
            .unwrap_or_default()
            .into_iter()
            .map(RawEntry::from)
            .collect();
        let snapshot = Snapshot::new(entries);
        match self.update_time_stamp.and_then(millis_to_datetime) {
            Some(updated_at) => snapshot.with_updated_at(updated_at),
            None => snapshot,
        }
    }
}

/// One open position as reported by the leaderboard.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPosition {
    pub symbol: String,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub pnl: Decimal,
    pub roe: Decimal,
    /// Signed size, negative for shorts.
    pub amount: Decimal,
    #[serde(default)]
    pub update_time_stamp: Option<i64>,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub yellow: bool,
    #[serde(default)]
    pub trade_before: bool,
}

impl From<LeaderboardPosition> for RawEntry {
    fn from(value: LeaderboardPosition) -> Self {
        RawEntry {
            symbol: value.symbol,
            entry_price: value.entry_price,
            mark_price: value.mark_price,
            pnl: value.pnl,
            roe: value.roe,
            amount: value.amount,
            leverage: value.leverage,
            update_timestamp: value.update_time_stamp,
        }
    }
}

/// Payload of `getOtherLeaderboardBaseInfo`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBaseInfo {
    #[serde(default)]
    pub nick_name: String,
    #[serde(default)]
    pub user_photo_url: Option<String>,
    #[serde(default)]
    pub position_shared: bool,
    #[serde(default)]
    pub delivery_position_shared: bool,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub twitter_url: Option<String>,
    #[serde(default)]
    pub introduction: Option<String>,
}

/// One hit of `searchNickname`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NicknameDetails {
    pub encrypted_uid: String,
    pub nickname: String,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub user_photo_url: Option<String>,
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
