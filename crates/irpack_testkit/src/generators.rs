//! Record and event generators, plain and as proptest strategies.

use irpack_core::{LogEvent, Record};
use proptest::prelude::*;

/// Timestamp of the first generated record.
pub const BASE_TIMESTAMP: i64 = 1_700_000_000_000;

/// `n` records with messages `line 0`, `line 1`, ... one millisecond apart.
pub fn records(n: usize) -> Vec<Record> {
    records_from(0, n)
}

/// Like [`records`], numbering from `first`.
pub fn records_from(first: usize, n: usize) -> Vec<Record> {
    (first..first + n)
        .map(|i| Record::with_message(BASE_TIMESTAMP + i as i64, "log", format!("line {i}")))
        .collect()
}

/// Messages [`records_from`] produces.
pub fn messages_from(first: usize, n: usize) -> Vec<String> {
    (first..first + n).map(|i| format!("line {i}")).collect()
}

/// `n` events whose messages are `width` characters long.
pub fn events(n: usize, width: usize) -> Vec<LogEvent> {
    (0..n)
        .map(|i| LogEvent::new(BASE_TIMESTAMP + i as i64, format!("{i:0width$}")))
        .collect()
}

/// Strategy for tags the buffer directory accepts.
pub fn tag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_.-]{0,15}")
        .expect("Invalid regex")
        .prop_filter("reserved name", |s| s != "LOCK")
}

/// Strategy for printable messages, including empty ones.
pub fn message_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~]{0,200}").expect("Invalid regex")
}

/// Strategy for event batches with non-decreasing timestamps.
pub fn event_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<LogEvent>> {
    prop::collection::vec((0i64..5_000, message_strategy()), 0..max_len).prop_map(|items| {
        let mut timestamp = BASE_TIMESTAMP;
        items
            .into_iter()
            .map(|(step, message)| {
                timestamp += step;
                LogEvent::new(timestamp, message)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_numbered() {
        let batch = records_from(5, 2);
        assert_eq!(batch[0].timestamp_ms, BASE_TIMESTAMP + 5);
        assert_eq!(messages_from(5, 2), ["line 5", "line 6"]);
    }

    proptest! {
        #[test]
        fn tags_are_accepted(tag in tag_strategy()) {
            prop_assert!(irpack_core::validate_tag(&tag).is_ok());
        }

        #[test]
        fn batches_are_ordered(batch in event_batch_strategy(32)) {
            prop_assert!(batch.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
    }
}
