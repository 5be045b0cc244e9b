//! Outstanding replies of relayed queries.
//!
//! A station that forwards a request to N neighbours tracks a
//! [`ResponseRecord`] with `remaining_responses = N` and feeds every child
//! reply through [`OutstandingTable::apply_reply`]. The table owns the
//! update policy:
//!
//! - a reply replaces the best answer only if it reached the destination
//!   (`time >= 0`) and arrives strictly earlier than the current best;
//! - `time` and `stop` are always written together;
//! - the countdown never goes below zero, and the record leaves the table
//!   the moment it completes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AggregateError;
use crate::response::ResponseRecord;

/// Identity of a tracked query at one station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub origin: String,
    pub seqno: i64,
    pub sender: String,
}

impl QueryKey {
    pub fn new(origin: impl Into<String>, seqno: i64, sender: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            seqno,
            sender: sender.into(),
        }
    }

    pub fn of(record: &ResponseRecord) -> Self {
        Self::new(record.origin.clone(), record.seqno, record.sender.clone())
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} via {}", self.origin, self.seqno, self.sender)
    }
}

/// One child reply: the neighbour that answered and its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub time: i64,
    pub stop: String,
}

impl Reply {
    pub fn new(time: i64, stop: impl Into<String>) -> Self {
        Self { time, stop: stop.into() }
    }
}

/// Explicit view of a record's implicit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationState {
    Pending { remaining: u32 },
    Complete { time: i64, stop: String },
}

impl AggregationState {
    pub fn of(record: &ResponseRecord) -> Self {
        match record.remaining_responses {
            0 => AggregationState::Complete {
                time: record.time,
                stop: record.stop.clone(),
            },
            remaining => AggregationState::Pending { remaining },
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, AggregationState::Complete { .. })
    }
}

/// Result of feeding one reply into the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Pending { remaining: u32 },
    /// The last reply arrived; the record is no longer tracked.
    Complete(ResponseRecord),
}

/// Whether `record` holds a usable answer yet.
pub fn has_best(record: &ResponseRecord) -> bool {
    record.time >= 0 && !record.stop.is_empty()
}

/// Offer `reply` as the record's best answer. Returns `true` if it replaced
/// the previous one.
pub fn offer_best(record: &mut ResponseRecord, reply: &Reply) -> bool {
    if reply.time < 0 {
        return false;
    }
    if has_best(record) && reply.time >= record.time {
        return false;
    }
    record.time = reply.time;
    record.stop = reply.stop.clone();
    true
}

/// Decrement the countdown by exactly one.
pub fn count_reply(record: &mut ResponseRecord) -> Result<u32, AggregateError> {
    record.remaining_responses = record
        .remaining_responses
        .checked_sub(1)
        .ok_or_else(|| AggregateError::ReplyAfterComplete(QueryKey::of(record)))?;
    Ok(record.remaining_responses)
}

#[derive(Debug, Default)]
pub struct OutstandingTable {
    records: HashMap<QueryKey, ResponseRecord>,
}

impl OutstandingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly forwarded query.
    pub fn track(&mut self, record: ResponseRecord) -> Result<(), AggregateError> {
        let key = QueryKey::of(&record);
        if record.remaining_responses == 0 {
            return Err(AggregateError::NothingOutstanding(key));
        }
        if self.records.contains_key(&key) {
            return Err(AggregateError::DuplicateQuery(key));
        }
        tracing::debug!(query = %key, remaining = record.remaining_responses, "tracking query");
        self.records.insert(key, record);
        Ok(())
    }

    pub fn apply_reply(&mut self, key: &QueryKey, reply: Reply) -> Result<ReplyOutcome, AggregateError> {
        let record = self
            .records
            .get_mut(key)
            .ok_or_else(|| AggregateError::UnknownQuery(key.clone()))?;

        if offer_best(record, &reply) {
            tracing::debug!(query = %key, time = reply.time, stop = %reply.stop, "new best answer");
        }
        let remaining = count_reply(record)?;
        if remaining > 0 {
            return Ok(ReplyOutcome::Pending { remaining });
        }

        match self.records.remove(key) {
            Some(done) => Ok(ReplyOutcome::Complete(done)),
            None => Err(AggregateError::UnknownQuery(key.clone())),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<&ResponseRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::NO_TIME;

    #[test]
    fn test_best_answer_scenario() {
        // Two children; the second one finds a faster route.
        let mut table = OutstandingTable::new();
        let record = ResponseRecord::new(2, "B", "A", 7, 0, "");
        let key = QueryKey::of(&record);
        table.track(record).unwrap();

        let outcome = table.apply_reply(&key, Reply::new(5, "X")).unwrap();
        assert_eq!(outcome, ReplyOutcome::Pending { remaining: 1 });
        assert_eq!(table.get(&key).unwrap().time, 5);
        assert_eq!(table.get(&key).unwrap().stop, "X");

        let outcome = table.apply_reply(&key, Reply::new(3, "Y")).unwrap();
        let ReplyOutcome::Complete(done) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(done.remaining_responses, 0);
        assert_eq!(done.time, 3);
        assert_eq!(done.stop, "Y");
        assert!(table.is_empty());
    }

    #[test]
    fn test_slower_reply_keeps_best() {
        let mut record = ResponseRecord::new(2, "B", "A", 1, NO_TIME, "");

        assert!(offer_best(&mut record, &Reply::new(600, "X")));
        assert!(!offer_best(&mut record, &Reply::new(700, "Y")));
        // Ties keep the earlier answer.
        assert!(!offer_best(&mut record, &Reply::new(600, "Z")));

        assert_eq!(record.time, 600);
        assert_eq!(record.stop, "X");
    }

    #[test]
    fn test_unreachable_reply_never_wins() {
        let mut record = ResponseRecord::new(1, "B", "A", 1, NO_TIME, "");
        assert!(!offer_best(&mut record, &Reply::new(NO_TIME, "X")));
        assert!(record.stop.is_empty());
        assert!(!has_best(&record));
    }

    #[test]
    fn test_all_unreachable_completes_without_answer() {
        let mut table = OutstandingTable::new();
        let record = ResponseRecord::new(2, "B", "A", 9, NO_TIME, "");
        let key = QueryKey::of(&record);
        table.track(record).unwrap();

        table.apply_reply(&key, Reply::new(NO_TIME, "X")).unwrap();
        let ReplyOutcome::Complete(done) = table.apply_reply(&key, Reply::new(NO_TIME, "Y")).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(done.time, NO_TIME);
        assert!(!has_best(&done));
    }

    #[test]
    fn test_zero_remaining_is_complete() {
        let record = ResponseRecord::new(0, "B", "A", 3, 480, "X");
        assert_eq!(
            AggregationState::of(&record),
            AggregationState::Complete {
                time: 480,
                stop: "X".into()
            }
        );

        let mut table = OutstandingTable::new();
        assert!(matches!(
            table.track(record),
            Err(AggregateError::NothingOutstanding(_))
        ));
    }

    #[test]
    fn test_count_never_goes_below_zero() {
        let mut record = ResponseRecord::new(1, "B", "A", 3, NO_TIME, "");
        assert_eq!(count_reply(&mut record).unwrap(), 0);
        assert!(matches!(
            count_reply(&mut record),
            Err(AggregateError::ReplyAfterComplete(_))
        ));
        assert_eq!(record.remaining_responses, 0);
    }

    #[test]
    fn test_reply_after_completion_is_unknown() {
        let mut table = OutstandingTable::new();
        let record = ResponseRecord::new(1, "B", "A", 4, NO_TIME, "");
        let key = QueryKey::of(&record);
        table.track(record).unwrap();

        table.apply_reply(&key, Reply::new(500, "X")).unwrap();
        assert!(matches!(
            table.apply_reply(&key, Reply::new(400, "Y")),
            Err(AggregateError::UnknownQuery(_))
        ));
    }

    #[test]
    fn test_duplicate_query_rejected() {
        let mut table = OutstandingTable::new();
        table.track(ResponseRecord::new(1, "B", "A", 4, NO_TIME, "")).unwrap();

        assert!(matches!(
            table.track(ResponseRecord::new(3, "B", "A", 4, NO_TIME, "")),
            Err(AggregateError::DuplicateQuery(_))
        ));
        // Same query arriving through another neighbour is a separate entry.
        table.track(ResponseRecord::new(2, "C", "A", 4, NO_TIME, "")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_pending_state() {
        let record = ResponseRecord::new(3, "B", "A", 1, NO_TIME, "");
        let state = AggregationState::of(&record);
        assert_eq!(state, AggregationState::Pending { remaining: 3 });
        assert!(!state.is_complete());
    }
}
