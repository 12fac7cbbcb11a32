//! Turns a stream of full position snapshots into discrete change events.

use std::collections::{BTreeMap, HashSet};

use ftl_core::{classify, ChangeEvent, ChangeKind, PositionKey, PositionRecord, RawEntry};
use rust_decimal::Decimal;
use tracing::{debug, info, info_span, Span};

/// Current positions of one tracked account, diffed against every new snapshot.
///
/// The tracker is not synchronized: drive it with one `update` call per
/// delivered snapshot, in delivery order. Distinct trackers share nothing.
#[derive(Debug)]
pub struct PositionTracker {
    account: String,
    positions: BTreeMap<PositionKey, PositionRecord>,
    bootstrapped: bool,
    span: Span,
}

impl PositionTracker {
    pub fn new(account: impl Into<String>) -> Self {
        let account = account.into();
        let span = info_span!("position_tracker", account = %account);
        Self {
            account,
            positions: BTreeMap::new(),
            bootstrapped: false,
            span,
        }
    }

    /// Emit the tracker's log lines inside `span` instead of the default one.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Whether the baseline snapshot has been processed.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, key: &PositionKey) -> Option<&PositionRecord> {
        self.positions.get(key)
    }

    /// Tracked positions in identity order.
    pub fn positions(&self) -> impl Iterator<Item = &PositionRecord> {
        self.positions.values()
    }

    /// Apply one snapshot and return the changes it implies.
    ///
    /// Changed or new identities are reported in snapshot order, followed by a
    /// `Closed` event for every identity the snapshot no longer contains. The
    /// first snapshot only establishes the baseline and reports nothing.
    pub fn update<I>(&mut self, snapshot: I) -> Vec<ChangeEvent>
    where
        I: IntoIterator<Item = RawEntry>,
    {
        let span = self.span.clone();
        let _entered = span.enter();

        let emit = self.bootstrapped;
        let mut seen = HashSet::new();
        let mut events = Vec::new();

        for raw in snapshot {
            let mut record = PositionRecord::from_raw(raw);
            if record.magnitude.is_zero() {
                debug!(ticker = %record.ticker, "ignoring zero-size snapshot entry");
                continue;
            }
            let key = record.key();
            seen.insert(key.clone());

            let previous = match self.positions.get_mut(&key) {
                Some(existing) if existing.magnitude == record.magnitude => {
                    existing.refresh_marks(&record);
                    continue;
                }
                Some(existing) => existing.magnitude,
                None => Decimal::ZERO,
            };

            record.previous_magnitude = previous;
            record.kind = classify(previous, record.magnitude);
            info!(
                send = emit,
                kind = %record.kind,
                position = %key,
                previous = %record.previous_magnitude,
                current = %record.magnitude,
                entry_price = %record.entry_price,
                "position change"
            );
            if emit {
                events.push(ChangeEvent::new(record.clone()));
            }
            self.positions.insert(key, record);
        }

        let gone: Vec<PositionKey> = self
            .positions
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();
        for key in gone {
            let Some(mut record) = self.positions.remove(&key) else {
                continue;
            };
            record.previous_magnitude = record.magnitude;
            record.magnitude = Decimal::ZERO;
            record.kind = ChangeKind::Closed;
            info!(
                kind = %record.kind,
                position = %key,
                previous = %record.previous_magnitude,
                "position no longer reported"
            );
            events.push(ChangeEvent::new(record));
        }

        if !self.bootstrapped {
            debug!(positions = self.positions.len(), "baseline snapshot applied");
            self.bootstrapped = true;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftl_core::Direction;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn entry(symbol: &str, amount: Decimal) -> RawEntry {
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

    fn btc_long() -> PositionKey {
        PositionKey::new(Direction::Long, "BTCUSDT")
    }

    #[test]
    fn bootstrap_is_silent() {
        let mut tracker = PositionTracker::new("47E6D002EBB1173967A6561F72B9395C");
        assert!(!tracker.is_bootstrapped());
        let events = tracker.update(vec![entry("BTCUSDT", dec!(9026)), entry("ETHUSDT", dec!(-3))]);
        assert!(events.is_empty());
        assert!(tracker.is_bootstrapped());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn follows_a_position_through_its_lifecycle() {
        let mut tracker = PositionTracker::new("leader");
        assert!(tracker.update(vec![entry("BTCUSDT", dec!(9026))]).is_empty());
        assert_eq!(tracker.len(), 1);

        let mut drifted = entry("BTCUSDT", dec!(9026));
        drifted.mark_price = dec!(1.9);
        drifted.pnl = dec!(12.5);
        drifted.roe = dec!(0.01);
        assert!(tracker.update(vec![drifted]).is_empty());
        let stored = tracker.get(&btc_long()).unwrap();
        assert_eq!(stored.mark_price, dec!(1.9));
        assert_eq!(stored.pnl, dec!(12.5));
        assert_eq!(stored.roe, dec!(0.01));

        let events = tracker.update(vec![entry("BTCUSDT", dec!(9027))]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::AddedTo);
        assert_eq!(events[0].position.previous_magnitude, dec!(9026));
        assert_eq!(events[0].position.magnitude, dec!(9027));

        let events = tracker.update(Vec::new());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Closed);
        assert_eq!(events[0].position.ticker, "BTCUSDT");
        assert_eq!(events[0].position.previous_magnitude, dec!(9027));
        assert_eq!(events[0].position.magnitude, Decimal::ZERO);
        assert!(tracker.is_empty());
    }

    #[test]
    fn opened_after_bootstrap_is_reported() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(Vec::new());
        let events = tracker.update(vec![entry("SUSHIUSDT", dec!(9026))]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Opened);
        assert_eq!(events[0].position.previous_magnitude, Decimal::ZERO);
        assert_eq!(events[0].position.direction, Direction::Long);
    }

    #[test]
    fn partial_close_of_a_short() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(vec![entry("ETHUSDT", dec!(-10))]);
        let events = tracker.update(vec![entry("ETHUSDT", dec!(-4))]);
        assert_eq!(events.len(), 1);
        let change = &events[0];
        assert_eq!(change.kind(), ChangeKind::PartiallyClosed);
        assert_eq!(change.position.direction, Direction::Short);
        assert_eq!(change.position.previous_magnitude, dec!(10));
        let order = change.to_order();
        assert_eq!(order.direction, Direction::Long);
        assert_eq!(order.magnitude, dec!(6));
        assert!(order.reduce_only);
    }

    #[test]
    fn flipping_sides_closes_one_identity_and_opens_another() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(vec![entry("BTCUSDT", dec!(1))]);
        let events = tracker.update(vec![entry("BTCUSDT", dec!(-2))]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), ChangeKind::Opened);
        assert_eq!(events[0].position.direction, Direction::Short);
        assert_eq!(events[1].kind(), ChangeKind::Closed);
        assert_eq!(events[1].position.direction, Direction::Long);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn hedged_sides_are_tracked_independently() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(vec![entry("BTCUSDT", dec!(1)), entry("BTCUSDT", dec!(-1))]);
        assert_eq!(tracker.len(), 2);
        let events = tracker.update(vec![entry("BTCUSDT", dec!(1)), entry("BTCUSDT", dec!(-3))]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::AddedTo);
        assert_eq!(events[0].position.direction, Direction::Short);
    }

    #[test]
    fn replaying_a_snapshot_is_idempotent() {
        let mut tracker = PositionTracker::new("leader");
        let snapshot = vec![entry("BTCUSDT", dec!(1)), entry("ETHUSDT", dec!(2))];
        tracker.update(snapshot.clone());
        let mut grown = snapshot.clone();
        grown[0].amount = dec!(1.5);
        assert_eq!(tracker.update(grown.clone()).len(), 1);
        for _ in 0..3 {
            assert!(tracker.update(grown.clone()).is_empty());
        }
    }

    #[test]
    fn zero_size_entry_counts_as_absent() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(vec![entry("BTCUSDT", dec!(1))]);
        let events = tracker.update(vec![entry("BTCUSDT", Decimal::ZERO)]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), ChangeKind::Closed);
        assert!(tracker.is_empty());
    }

    #[test]
    fn duplicate_identity_keeps_one_record() {
        let mut tracker = PositionTracker::new("leader");
        tracker.update(Vec::new());
        let events = tracker.update(vec![entry("BTCUSDT", dec!(1)), entry("BTCUSDT", dec!(2))]);
        assert_eq!(tracker.len(), 1);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind(), ChangeKind::AddedTo);
        assert_eq!(events[1].position.previous_magnitude, dec!(1));
        assert_eq!(tracker.get(&btc_long()).unwrap().magnitude, dec!(2));
    }

    #[test]
    fn trackers_share_no_state() {
        let mut first = PositionTracker::new("a");
        let mut second = PositionTracker::new("b");
        first.update(vec![entry("BTCUSDT", dec!(1))]);
        assert!(second.is_empty());
        assert!(!second.is_bootstrapped());
        second.update(Vec::new());
        assert_eq!(first.update(Vec::new()).len(), 1);
        assert_eq!(first.account(), "a");
    }

    fn snapshot_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
        prop::collection::vec((0usize..4, -5i64..=5), 0..6)
    }

    fn to_entries(lines: &[(usize, i64)]) -> Vec<RawEntry> {
        const TICKERS: [&str; 4] = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];
        lines
            .iter()
            .map(|(ticker, amount)| entry(TICKERS[*ticker], Decimal::from(*amount)))
            .collect()
    }

    fn identities(entries: &[RawEntry]) -> HashSet<PositionKey> {
        entries
            .iter()
            .cloned()
            .map(PositionRecord::from_raw)
            .filter(|record| !record.magnitude.is_zero())
            .map(|record| record.key())
            .collect()
    }

    proptest! {
        #[test]
        fn table_matches_latest_snapshot(polls in prop::collection::vec(snapshot_strategy(), 1..8)) {
            let mut tracker = PositionTracker::new("prop");
            for (index, poll) in polls.iter().enumerate() {
                let entries = to_entries(poll);
                let before: BTreeMap<PositionKey, Decimal> = tracker
                    .positions()
                    .map(|record| (record.key(), record.magnitude))
                    .collect();
                let after = identities(&entries);
                let events = tracker.update(entries);

                prop_assert_eq!(tracker.len(), after.len());
                if index == 0 {
                    prop_assert!(events.is_empty());
                }
                for key in before.keys().filter(|key| !after.contains(*key)) {
                    let closes = events
                        .iter()
                        .filter(|e| e.kind() == ChangeKind::Closed && &e.position.key() == key)
                        .count();
                    prop_assert_eq!(closes, 1);
                    prop_assert!(tracker.get(key).is_none());
                }
                // A repeated identity is compared with the earlier entry, so only
                // the first change per identity sees the pre-poll table.
                let mut compared = HashSet::new();
                for event in &events {
                    prop_assert!(event.position.magnitude >= Decimal::ZERO);
                    prop_assert_ne!(event.kind(), ChangeKind::Unchanged);
                    let key = event.position.key();
                    if event.kind() != ChangeKind::Closed && compared.insert(key.clone()) {
                        let held = before.get(&key).copied().unwrap_or(Decimal::ZERO);
                        prop_assert_eq!(event.position.previous_magnitude, held);
                    }
                }
            }
        }
    }
}
