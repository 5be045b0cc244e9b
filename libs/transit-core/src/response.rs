use serde::{Deserialize, Serialize};

/// `time` value of a record (or frame) that has no answer yet.
pub const NO_TIME: i64 = -1;

/// Pending aggregation point for one relayed query.
///
/// A station creates one of these when it forwards a request to its
/// neighbours, and keeps it until every neighbour has replied. The record
/// itself does no validation; the owning [`OutstandingTable`] decides when
/// `time`/`stop` are replaced and guards the countdown.
///
/// [`OutstandingTable`]: crate::aggregate::OutstandingTable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Replies still awaited before the aggregated answer is final.
    pub remaining_responses: u32,
    /// Station the aggregated answer goes back to.
    pub sender: String,
    /// Station that originated the query.
    pub origin: String,
    /// Query sequence number, unique per origin.
    pub seqno: i64,
    /// Best arrival time found so far.
    pub time: i64,
    /// Next stop on the route that yields `time`.
    pub stop: String,
}

impl ResponseRecord {
    pub fn new(
        remaining_responses: u32,
        sender: impl Into<String>,
        origin: impl Into<String>,
        seqno: i64,
        time: i64,
        stop: impl Into<String>,
    ) -> Self {
        Self {
            remaining_responses,
            sender: sender.into(),
            origin: origin.into(),
            seqno,
            time,
            stop: stop.into(),
        }
    }
}

impl std::fmt::Display for ResponseRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Remaining Responses: {}", self.remaining_responses)?;
        writeln!(f, "Sender: {}", self.sender)?;
        writeln!(f, "Origin: {}", self.origin)?;
        writeln!(f, "Seqno: {}", self.seqno)?;
        writeln!(f, "Best time: {}", self.time)?;
        writeln!(f, "Best stop: {}", self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_read_back() {
        let record = ResponseRecord::new(3, "Busport_B", "Station_A", 42, 615, "Junction_C");

        assert_eq!(record.remaining_responses, 3);
        assert_eq!(record.sender, "Busport_B");
        assert_eq!(record.origin, "Station_A");
        assert_eq!(record.seqno, 42);
        assert_eq!(record.time, 615);
        assert_eq!(record.stop, "Junction_C");
    }

    #[test]
    fn test_render_order() {
        let record = ResponseRecord::new(2, "B", "A", 7, 540, "X");

        assert_eq!(
            record.to_string(),
            "Remaining Responses: 2\n\
             Sender: B\n\
             Origin: A\n\
             Seqno: 7\n\
             Best time: 540\n\
             Best stop: X\n"
        );
    }

    #[test]
    fn test_render_empty_and_negative() {
        let record = ResponseRecord::new(0, "", "", -5, NO_TIME, "");
        let rendered = record.to_string();
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(
            lines,
            vec![
                "Remaining Responses: 0",
                "Sender: ",
                "Origin: ",
                "Seqno: -5",
                "Best time: -1",
                "Best stop: ",
            ]
        );
    }

    #[test]
    fn test_extreme_integers() {
        let record = ResponseRecord::new(1, "B", "A", i64::MIN, i64::MAX, "X");
        assert_eq!(record.seqno, i64::MIN);
        assert_eq!(record.time, i64::MAX);

        let rendered = record.to_string();
        assert!(rendered.contains(&format!("Seqno: {}\n", i64::MIN)));
        assert!(rendered.contains(&format!("Best time: {}\n", i64::MAX)));
    }

    #[test]
    fn test_json_roundtrip() {
        let record = ResponseRecord::new(4, "Warwick-Stn", "Cottesloe-Stn", 0, NO_TIME, "");

        let json = serde_json::to_string(&record).unwrap();
        let back: ResponseRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["seqno"].is_i64());
        assert!(value["stop"].is_string());
    }
}
