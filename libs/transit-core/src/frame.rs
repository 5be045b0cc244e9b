use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::response::NO_TIME;

/// Largest datagram a station sends or accepts.
pub const MAX_FRAME_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Announces the sender's station name to a neighbour.
    Name,
    Request,
    Response,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameKind::Name => f.write_str("name"),
            FrameKind::Request => f.write_str("request"),
            FrameKind::Response => f.write_str("response"),
        }
    }
}

/// UDP frame exchanged between neighbouring stations. One JSON object per
/// datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: FrameKind,
    /// Station that issued the query, or the announcing station for `name`.
    pub origin: String,
    /// Destination station of the query.
    #[serde(default)]
    pub dest: String,
    /// Stations the request passed through, oldest first.
    #[serde(default)]
    pub src: Vec<String>,
    #[serde(default = "no_time")]
    pub seqno: i64,
    /// Request: arrival time at the receiving station.
    /// Response: best arrival time at `dest`.
    #[serde(default = "no_time")]
    pub time: i64,
}

fn no_time() -> i64 {
    NO_TIME
}

impl Frame {
    pub fn name(station: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Name,
            origin: station.into(),
            dest: String::new(),
            src: Vec::new(),
            seqno: NO_TIME,
            time: NO_TIME,
        }
    }

    pub fn request(
        origin: impl Into<String>,
        dest: impl Into<String>,
        src: Vec<String>,
        seqno: i64,
        time: i64,
    ) -> Self {
        Self {
            kind: FrameKind::Request,
            origin: origin.into(),
            dest: dest.into(),
            src,
            seqno,
            time,
        }
    }

    pub fn response(
        origin: impl Into<String>,
        dest: impl Into<String>,
        src: Vec<String>,
        seqno: i64,
        time: i64,
    ) -> Self {
        Self {
            kind: FrameKind::Response,
            origin: origin.into(),
            dest: dest.into(),
            src,
            seqno,
            time,
        }
    }

    /// The station this frame most recently passed through.
    pub fn last_hop(&self) -> Option<&str> {
        self.src.last().map(String::as_str)
    }

    pub fn visited(&self, station: &str) -> bool {
        self.src.iter().any(|s| s == station)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(bytes.len()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}->{} #{} t={} via [{}]",
            self.kind,
            self.origin,
            self.dest,
            self.seqno,
            self.time,
            self.src.join(",")
        )
    }
}
