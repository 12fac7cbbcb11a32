use anyhow::Result;
use ftl_core::{ChangeKind, ReplicaOrder};
use ftl_events::FeedEvent;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    /// One JSON object per line.
    Json,
}

/// Render one feed event; changes carry their replica order.
pub fn render(event: &FeedEvent, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(render_human(event)),
        OutputFormat::Json => render_json(event),
    }
}

fn render_human(event: &FeedEvent) -> String {
    match event {
        FeedEvent::Change(notice) => {
            let position = &notice.change.position;
            let sizes = match notice.change.kind() {
                ChangeKind::Opened => format!("{}", position.magnitude),
                _ => format!("{} -> {}", position.previous_magnitude, position.magnitude),
            };
            format!(
                "{} [{}] {} {} {} ({sizes}) entry {} mark {} | {}",
                notice.observed_at.format("%Y-%m-%d %H:%M:%S"),
                notice.account,
                notice.change.kind(),
                position.direction,
                position.ticker,
                position.entry_price,
                position.mark_price,
                describe_order(&notice.change.to_order()),
            )
        }
        FeedEvent::PollFailed(failure) => format!(
            "{} [{}] poll failed{}: {}",
            failure.observed_at.format("%Y-%m-%d %H:%M:%S"),
            failure.account,
            if failure.transient { " (will retry)" } else { "" },
            failure.error,
        ),
    }
}

fn render_json(event: &FeedEvent) -> Result<String> {
    let mut value = serde_json::to_value(event)?;
    if let (FeedEvent::Change(notice), Value::Object(map)) = (event, &mut value) {
        map.insert(
            "order".to_string(),
            serde_json::to_value(notice.change.to_order())?,
        );
    }
    Ok(serde_json::to_string(&value)?)
}

pub fn describe_order(order: &ReplicaOrder) -> String {
    let mut line = format!(
        "order {} {} {} x{}",
        order.direction, order.magnitude, order.ticker, order.leverage
    );
    if order.reduce_only {
        line.push_str(" reduce-only");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftl_broker::{AccountId, SourceError};
    use ftl_core::{ChangeEvent, PositionRecord};
    use ftl_events::PollFailure;
    use ftl_test_utils::entry;
    use rust_decimal_macros::dec;

    fn partial_close() -> FeedEvent {
        let mut record = PositionRecord::from_raw(entry("SUSHIUSDT", dec!(-9000)));
        record.previous_magnitude = dec!(9026);
        record.kind = ChangeKind::PartiallyClosed;
        FeedEvent::change(AccountId::from("leader"), ChangeEvent::new(record))
    }

    #[test]
    fn human_line_names_change_and_order() {
        let line = render(&partial_close(), OutputFormat::Human).unwrap();
        assert!(line.contains("[leader] partially closed SHORT SUSHIUSDT (9026 -> 9000)"));
        assert!(line.ends_with("order LONG 26 SUSHIUSDT x2 reduce-only"));
    }

    #[test]
    fn json_line_embeds_order() {
        let line = render(&partial_close(), OutputFormat::Json).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "change");
        assert_eq!(value["change"]["position"]["kind"], "partially_closed");
        assert_eq!(value["order"]["direction"], "LONG");
        assert_eq!(value["order"]["reduce_only"], true);
    }

    #[test]
    fn failures_render_without_order() {
        let failure = FeedEvent::PollFailed(PollFailure::new(
            AccountId::from("leader"),
            &SourceError::BadStatus {
                status: 404,
                body: String::new(),
            },
        ));
        let line = render(&failure, OutputFormat::Human).unwrap();
        assert!(line.contains("[leader] poll failed: unexpected status 404"));

        let value: Value = serde_json::from_str(&render(&failure, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(value["type"], "poll_failed");
        assert!(value.get("order").is_none());
    }
}
