#[derive(Debug, thiserror::Error)]
pub enum StationError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("bind {what} {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[error("timetable: {0}")]
    Timetable(#[from] transit_core::TimetableError),

    #[error("http server: {0}")]
    Http(std::io::Error),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

/// Why a browser query could not be answered.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("station is not running")]
    Stopped,

    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),
}
