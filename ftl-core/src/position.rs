use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ChangeKind;

/// Side of a tracked position.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The side an order must take to reduce a position held in this direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("LONG"),
            Self::Short => f.write_str("SHORT"),
        }
    }
}

/// One line of a positions snapshot as delivered by a snapshot source.
///
/// `amount` is signed: negative values describe short positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub symbol: String,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub pnl: Decimal,
    pub roe: Decimal,
    pub amount: Decimal,
    pub leverage: u32,
    /// Exchange-side update time in milliseconds since the epoch.
    pub update_timestamp: Option<i64>,
}

/// Stable identity of a logical position across polls.
///
/// Only the fields that cannot drift while the position stays open take part;
/// size, prices and P&L change every poll and are excluded.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PositionKey {
    pub ticker: String,
    pub direction: Direction,
}

impl PositionKey {
    pub fn new(direction: Direction, ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            direction,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.ticker)
    }
}

/// Canonical view of a position held by the tracked account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub direction: Direction,
    pub ticker: String,
    /// Absolute size; the sign lives in `direction`.
    pub magnitude: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub pnl: Decimal,
    pub roe: Decimal,
    /// Size recorded for this identity on the preceding poll (zero when new).
    pub previous_magnitude: Decimal,
    pub kind: ChangeKind,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    /// Normalize a raw snapshot line into a canonical record.
    ///
    /// A negative amount becomes a short of the absolute size. The returned
    /// record has not been compared against any previous state yet, so it is
    /// tagged as [`ChangeKind::Opened`] with a zero previous magnitude.
    pub fn from_raw(raw: RawEntry) -> Self {
        let (direction, magnitude) = if raw.amount < Decimal::ZERO {
            (Direction::Short, raw.amount.abs())
        } else {
            (Direction::Long, raw.amount)
        };
        Self {
            direction,
            ticker: raw.symbol,
            magnitude,
            entry_price: raw.entry_price,
            mark_price: raw.mark_price,
            leverage: raw.leverage,
            pnl: raw.pnl,
            roe: raw.roe,
            previous_magnitude: Decimal::ZERO,
            kind: ChangeKind::Opened,
            updated_at: raw
                .update_timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        }
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.direction, self.ticker.clone())
    }

    /// Copy the fields that drift every poll while the size stays the same.
    pub fn refresh_marks(&mut self, latest: &PositionRecord) {
        self.mark_price = latest.mark_price;
        self.pnl = latest.pnl;
        self.roe = latest.roe;
        if latest.updated_at.is_some() {
            self.updated_at = latest.updated_at;
        }
    }
}

impl From<RawEntry> for PositionRecord {
    fn from(raw: RawEntry) -> Self {
        Self::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(symbol: &str, amount: Decimal) -> RawEntry {
        RawEntry {
            symbol: symbol.to_string(),
            entry_price: dec!(1.886),
            mark_price: dec!(1.85843264),
            pnl: dec!(-248.82299136),
            roe: dec!(-0.02261789),
            amount,
            leverage: 2,
            update_timestamp: Some(1_667_674_507_457),
        }
    }

    #[test]
    fn negative_amount_becomes_short() {
        let record = PositionRecord::from_raw(raw("SUSHIUSDT", dec!(-9026)));
        assert_eq!(record.direction, Direction::Short);
        assert_eq!(record.magnitude, dec!(9026));
        assert_eq!(record.ticker, "SUSHIUSDT");
        assert_eq!(record.leverage, 2);
    }

    #[test]
    fn positive_amount_stays_long() {
        let record = PositionRecord::from_raw(raw("SUSHIUSDT", dec!(0.5)));
        assert_eq!(record.direction, Direction::Long);
        assert_eq!(record.magnitude, dec!(0.5));
        assert_eq!(record.previous_magnitude, Decimal::ZERO);
        assert_eq!(
            record.updated_at.map(|ts| ts.timestamp_millis()),
            Some(1_667_674_507_457)
        );
    }

    #[test]
    fn identity_ignores_size_and_prices() {
        let a = PositionRecord::from_raw(raw("BTCUSDT", dec!(1)));
        let mut b_raw = raw("BTCUSDT", dec!(2));
        b_raw.entry_price = dec!(25000);
        b_raw.pnl = dec!(12);
        let b = PositionRecord::from_raw(b_raw);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn identity_separates_ticker_and_direction() {
        let long = PositionRecord::from_raw(raw("BTCUSDT", dec!(1)));
        let short = PositionRecord::from_raw(raw("BTCUSDT", dec!(-1)));
        let other = PositionRecord::from_raw(raw("ETHUSDT", dec!(1)));
        assert_ne!(long.key(), short.key());
        assert_ne!(long.key(), other.key());
    }

    #[test]
    fn refresh_marks_keeps_size() {
        let mut stored = PositionRecord::from_raw(raw("BTCUSDT", dec!(1)));
        let mut latest_raw = raw("BTCUSDT", dec!(1));
        latest_raw.mark_price = dec!(2.1);
        latest_raw.pnl = dec!(10);
        latest_raw.roe = dec!(0.05);
        let latest = PositionRecord::from_raw(latest_raw);
        stored.refresh_marks(&latest);
        assert_eq!(stored.mark_price, dec!(2.1));
        assert_eq!(stored.pnl, dec!(10));
        assert_eq!(stored.roe, dec!(0.05));
        assert_eq!(stored.magnitude, dec!(1));
        assert_eq!(stored.entry_price, dec!(1.886));
    }

    #[test]
    fn direction_display_matches_wire_labels() {
        assert_eq!(Direction::Long.to_string(), "LONG");
        assert_eq!(Direction::Short.to_string(), "SHORT");
        assert_eq!(Direction::Long.opposite(), Direction::Short);
    }
}
