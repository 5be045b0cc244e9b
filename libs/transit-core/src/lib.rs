//! Query routing for a network of transit stations.
//!
//! Stations only know their own timetable and their direct neighbours. A
//! journey query is flooded through the network; every relaying station
//! keeps a [`ResponseRecord`] until its neighbours have answered, then passes
//! the earliest arrival back towards the origin.
//!
//! - [`response`] - the per-query aggregation record
//! - [`aggregate`] - outstanding-reply table and best-answer policy
//! - [`frame`] - UDP wire format
//! - [`timetable`] - timetable files and clock helpers
//! - [`node`] - I/O-free station state machine

pub mod aggregate;
pub mod error;
pub mod frame;
pub mod node;
pub mod response;
pub mod timetable;

pub use aggregate::{AggregationState, OutstandingTable, QueryKey, Reply, ReplyOutcome};
pub use error::{AggregateError, FrameError, NodeError, TimetableError};
pub use frame::{Frame, FrameKind, MAX_FRAME_LEN};
pub use node::{Action, Node, QueryAnswer};
pub use response::{ResponseRecord, NO_TIME};
pub use timetable::{
    format_clock, minutes_now, parse_clock, Clock, Journey, Minutes, Timetable, TimetableFile,
};
