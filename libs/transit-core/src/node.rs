//! Station protocol state machine.
//!
//! The node performs no I/O. Every handler returns the [`Action`]s the
//! runtime has to carry out, so the whole flooding/aggregation protocol can
//! be driven and checked without sockets.
//!
//! Protocol outline:
//!
//! 1. A query for `dest` enters at its origin station and is flooded as a
//!    `request` frame to every neighbour not yet on the frame's path that
//!    still has a journey today. Each copy carries the arrival time at that
//!    neighbour.
//! 2. The forwarding station tracks a [`ResponseRecord`] counting the copies
//!    it sent.
//! 3. The destination answers with its arrival time; stations that cannot
//!    go further answer `-1`. Answers travel back along the path.
//! 4. Each station keeps the earliest answer and, once every child replied,
//!    passes it upstream. The origin turns it into a [`QueryAnswer`].

use std::collections::BTreeMap;

use crate::aggregate::{has_best, OutstandingTable, QueryKey, Reply, ReplyOutcome};
use crate::error::NodeError;
use crate::frame::{Frame, FrameKind};
use crate::response::{ResponseRecord, NO_TIME};
use crate::timetable::{Minutes, Timetable};

/// Sequence numbers wrap here.
pub const MAX_SEQNO: i64 = i32::MAX as i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Arrival {
        time: Minutes,
        /// Next leg of the trip from this station, if still running.
        itinerary: Option<String>,
    },
    Unreachable,
    AlreadyThere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `frame` to the neighbour listening on `port`.
    Send { port: u16, frame: Frame },
    /// Resolve the locally issued query `seqno`.
    Answer { seqno: i64, answer: QueryAnswer },
}

pub struct Node {
    name: String,
    /// UDP port → station name. Empty until the neighbour announces itself.
    neighbours: BTreeMap<u16, String>,
    timetable: Timetable,
    outstanding: OutstandingTable,
    seqno: i64,
    frames_sent: u64,
}

impl Node {
    pub fn new(name: impl Into<String>, neighbour_ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            name: name.into(),
            neighbours: neighbour_ports.into_iter().map(|p| (p, String::new())).collect(),
            timetable: Timetable::default(),
            outstanding: OutstandingTable::new(),
            seqno: 0,
            frames_sent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_timetable(&mut self, timetable: Timetable) {
        self.timetable = timetable;
    }

    pub fn neighbour_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.neighbours.keys().copied()
    }

    pub fn neighbour_name(&self, port: u16) -> Option<&str> {
        self.neighbours
            .get(&port)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    pub fn outstanding(&self) -> &OutstandingTable {
        &self.outstanding
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Frames announcing this station to every configured neighbour.
    pub fn announce(&mut self) -> Vec<Action> {
        let actions: Vec<Action> = self
            .neighbours
            .keys()
            .map(|&port| Action::Send {
                port,
                frame: Frame::name(self.name.clone()),
            })
            .collect();
        self.frames_sent += actions.len() as u64;
        actions
    }

    /// Issue a query for `dest` originating at this station.
    pub fn start_query(&mut self, dest: &str, now: Minutes) -> Result<(i64, Vec<Action>), NodeError> {
        let seqno = self.next_seqno();
        tracing::info!(station = %self.name, dest, seqno, "query started");

        if dest == self.name {
            let answer = Action::Answer {
                seqno,
                answer: QueryAnswer::AlreadyThere,
            };
            return Ok((seqno, vec![answer]));
        }

        let frame = Frame::request(self.name.clone(), dest, Vec::new(), seqno, NO_TIME);
        let actions = self.forward(frame, now)?;
        Ok((seqno, actions))
    }

    pub fn handle_frame(&mut self, port: u16, frame: Frame, now: Minutes) -> Result<Vec<Action>, NodeError> {
        match frame.kind {
            FrameKind::Name => {
                self.learn_neighbour(port, frame.origin);
                Ok(Vec::new())
            }
            FrameKind::Request => self.handle_request(frame, now),
            FrameKind::Response => self.handle_response(frame, now),
        }
    }

    fn learn_neighbour(&mut self, port: u16, name: String) {
        match self.neighbours.insert(port, name.clone()) {
            Some(old) if old == name => {}
            Some(old) if old.is_empty() => {
                tracing::info!(station = %self.name, port, neighbour = %name, "neighbour named");
            }
            Some(old) => {
                tracing::warn!(station = %self.name, port, old = %old, neighbour = %name, "neighbour renamed");
            }
            None => {
                tracing::info!(station = %self.name, port, neighbour = %name, "new neighbour");
            }
        }
    }

    fn handle_request(&mut self, mut frame: Frame, now: Minutes) -> Result<Vec<Action>, NodeError> {
        let prev = frame
            .last_hop()
            .ok_or(NodeError::EmptyPath { kind: "request" })?
            .to_string();
        tracing::debug!(station = %self.name, from = %prev, %frame, "request received");

        if frame.dest == self.name {
            let port = self.port_of(&prev)?;
            frame.src.push(self.name.clone());
            let reply = Frame::response(frame.origin, frame.dest, frame.src, frame.seqno, frame.time);
            return Ok(vec![self.send(port, reply)]);
        }

        if frame.visited(&self.name) {
            tracing::debug!(station = %self.name, origin = %frame.origin, seqno = frame.seqno, "squashing cycle");
            let port = self.port_of(&prev)?;
            frame.src.push(self.name.clone());
            let reply = Frame::response(frame.origin, frame.dest, frame.src, frame.seqno, NO_TIME);
            return Ok(vec![self.send(port, reply)]);
        }

        self.forward(frame, now)
    }

    fn handle_response(&mut self, mut frame: Frame, now: Minutes) -> Result<Vec<Action>, NodeError> {
        let replier = frame.src.pop().ok_or(NodeError::EmptyPath { kind: "response" })?;
        tracing::debug!(station = %self.name, from = %replier, %frame, "response received");

        let misrouted = || NodeError::MisroutedResponse {
            origin: frame.origin.clone(),
            seqno: frame.seqno,
        };
        if frame.last_hop() != Some(self.name.as_str()) {
            return Err(misrouted());
        }
        let sender = match frame.src.len() {
            0 => return Err(misrouted()),
            1 => self.name.clone(),
            n => frame.src[n - 2].clone(),
        };

        let key = QueryKey::new(frame.origin.clone(), frame.seqno, sender);
        let record = match self.outstanding.apply_reply(&key, Reply::new(frame.time, replier))? {
            ReplyOutcome::Pending { remaining } => {
                tracing::debug!(station = %self.name, query = %key, remaining, "awaiting replies");
                return Ok(Vec::new());
            }
            ReplyOutcome::Complete(record) => record,
        };
        tracing::debug!(station = %self.name, "aggregation complete\n{record}");

        if record.origin == self.name {
            return Ok(vec![Action::Answer {
                seqno: record.seqno,
                answer: self.answer_from(&record, now),
            }]);
        }

        let port = self.port_of(&record.sender)?;
        let reply = Frame::response(record.origin, frame.dest, frame.src, record.seqno, record.time);
        Ok(vec![self.send(port, reply)])
    }

    /// Flood `frame` to every neighbour that has not seen it yet.
    fn forward(&mut self, mut frame: Frame, now: Minutes) -> Result<Vec<Action>, NodeError> {
        let sender = if frame.origin == self.name {
            self.name.clone()
        } else {
            frame
                .last_hop()
                .ok_or(NodeError::EmptyPath { kind: "request" })?
                .to_string()
        };
        let key = QueryKey::new(frame.origin.clone(), frame.seqno, sender.clone());
        frame.src.push(self.name.clone());

        // Same query, same upstream hop, different route: only one record per key.
        if self.outstanding.get(&key).is_some() {
            tracing::debug!(station = %self.name, query = %key, "already relaying, squashing second route");
            let port = self.port_of(&sender)?;
            let reply = Frame::response(frame.origin, frame.dest, frame.src, frame.seqno, NO_TIME);
            return Ok(vec![self.send(port, reply)]);
        }

        let start = if frame.time >= 0 { frame.time } else { now };

        let mut targets = Vec::new();
        for (&port, neighbour) in &self.neighbours {
            if neighbour.is_empty() {
                tracing::debug!(station = %self.name, port, "skipping unnamed neighbour");
                continue;
            }
            if frame.visited(neighbour) {
                continue;
            }
            // No journey left today: don't bother asking.
            if let Some(arrival) = self.timetable.arrival_time(neighbour, start) {
                targets.push((port, arrival));
            }
        }

        if targets.is_empty() {
            if frame.origin == self.name {
                tracing::info!(station = %self.name, dest = %frame.dest, "no route out of origin");
                return Ok(vec![Action::Answer {
                    seqno: frame.seqno,
                    answer: QueryAnswer::Unreachable,
                }]);
            }
            let port = self.port_of(&sender)?;
            let reply = Frame::response(frame.origin, frame.dest, frame.src, frame.seqno, NO_TIME);
            return Ok(vec![self.send(port, reply)]);
        }

        self.outstanding.track(ResponseRecord::new(
            targets.len() as u32,
            sender,
            frame.origin.clone(),
            frame.seqno,
            NO_TIME,
            "",
        ))?;

        let actions = targets
            .into_iter()
            .map(|(port, arrival)| {
                let mut out = frame.clone();
                out.time = arrival;
                self.send(port, out)
            })
            .collect();
        Ok(actions)
    }

    fn answer_from(&self, record: &ResponseRecord, now: Minutes) -> QueryAnswer {
        if !has_best(record) {
            return QueryAnswer::Unreachable;
        }
        let itinerary = self.timetable.itinerary(&record.stop, now);
        if itinerary.is_none() {
            tracing::warn!(station = %self.name, stop = %record.stop, "best route no longer runs today");
        }
        QueryAnswer::Arrival {
            time: record.time,
            itinerary,
        }
    }

    fn send(&mut self, port: u16, frame: Frame) -> Action {
        self.frames_sent += 1;
        Action::Send { port, frame }
    }

    fn port_of(&self, name: &str) -> Result<u16, NodeError> {
        self.neighbours
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&port, _)| port)
            .ok_or_else(|| NodeError::UnknownNeighbour(name.to_string()))
    }

    fn next_seqno(&mut self) -> i64 {
        let seqno = self.seqno;
        self.seqno = (self.seqno + 1) % MAX_SEQNO;
        seqno
    }
}
