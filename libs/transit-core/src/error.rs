use crate::aggregate::QueryKey;

#[derive(Debug, thiserror::Error)]
pub enum TimetableError {
    #[error("read '{path}': {source}")]
    Io { path: String, source: std::io::Error },

    #[error("line {line}: {detail}")]
    Parse { line: usize, detail: String },

    #[error("bad clock time '{0}'")]
    Clock(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("query {0} is already tracked")]
    DuplicateQuery(QueryKey),

    #[error("query {0} has no outstanding replies")]
    NothingOutstanding(QueryKey),

    #[error("no outstanding query {0}")]
    UnknownQuery(QueryKey),

    #[error("reply for {0} after it completed")]
    ReplyAfterComplete(QueryKey),
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("no neighbour named '{0}'")]
    UnknownNeighbour(String),

    #[error("{kind} frame has an empty path")]
    EmptyPath { kind: &'static str },

    #[error("response for {origin}#{seqno} did not come back through us")]
    MisroutedResponse { origin: String, seqno: i64 },

    #[error("aggregate: {0}")]
    Aggregate(#[from] AggregateError),
}
