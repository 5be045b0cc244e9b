use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use transit_core::{Action, Clock, Frame, Node, QueryAnswer, TimetableFile, MAX_FRAME_LEN};

use crate::error::QueryError;

/// A browser query waiting for the station's answer.
pub struct QueryRequest {
    pub dest: String,
    pub reply: oneshot::Sender<QueryAnswer>,
}

/// Cloneable front door to the station task.
#[derive(Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<QueryRequest>,
}

impl StationHandle {
    pub fn new(tx: mpsc::Sender<QueryRequest>) -> Self {
        Self { tx }
    }

    pub async fn query(&self, dest: &str, timeout: Duration) -> Result<QueryAnswer, QueryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueryRequest { dest: dest.to_string(), reply })
            .await
            .map_err(|_| QueryError::Stopped)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(QueryError::Stopped),
            Err(_) => Err(QueryError::Timeout(timeout)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Station task
// ═══════════════════════════════════════════════════════════════

/// Owns the [`Node`] and is the only place it is mutated: datagrams and
/// queries are handled one at a time, so every read-decide-update on an
/// outstanding record runs to completion before the next one starts.
pub struct Station {
    node: Node,
    timetable: TimetableFile,
    socket: Arc<UdpSocket>,
    host: String,
    clock: Clock,
    /// Locally issued queries by seqno.
    waiting: HashMap<i64, oneshot::Sender<QueryAnswer>>,
}

impl Station {
    pub fn new(mut node: Node, timetable: TimetableFile, socket: UdpSocket, host: String, clock: Clock) -> Self {
        node.set_timetable(timetable.timetable().clone());
        Self {
            node,
            timetable,
            socket: Arc::new(socket),
            host,
            clock,
            waiting: HashMap::new(),
        }
    }

    /// Run until `token` is cancelled or every [`StationHandle`] is gone.
    /// Returns the node for final reporting.
    pub async fn run(
        mut self,
        mut queries: mpsc::Receiver<QueryRequest>,
        startup_delay: Duration,
        token: CancellationToken,
    ) -> Node {
        // Neighbours need a moment to bind before they can hear us.
        tokio::select! {
            _ = token.cancelled() => return self.node,
            _ = tokio::time::sleep(startup_delay) => {}
        }
        let announce = self.node.announce();
        self.perform(announce).await;
        tracing::info!(station = %self.node.name(), "announced to neighbours, ready for frames");

        let socket = self.socket.clone();
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        loop {
            // Frames already queued go before new queries.
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.on_datagram(&buf[..len], from.port()).await,
                    Err(e) => tracing::warn!(station = %self.node.name(), error = %e, "udp receive failed"),
                },
                query = queries.recv() => match query {
                    Some(query) => self.on_query(query).await,
                    None => break,
                },
            }
        }

        tracing::info!(
            station = %self.node.name(),
            frames_sent = self.node.frames_sent(),
            outstanding = self.node.outstanding().len(),
            unanswered = self.waiting.len(),
            "station stopped"
        );
        self.node
    }

    async fn on_datagram(&mut self, bytes: &[u8], port: u16) {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(station = %self.node.name(), port, error = %e, "dropping datagram");
                return;
            }
        };
        self.refresh_timetable();
        let now = self.clock.now();
        match self.node.handle_frame(port, frame, now) {
            Ok(actions) => self.perform(actions).await,
            Err(e) => tracing::warn!(station = %self.node.name(), port, error = %e, "dropping frame"),
        }
    }

    async fn on_query(&mut self, query: QueryRequest) {
        self.refresh_timetable();
        let now = self.clock.now();
        match self.node.start_query(&query.dest, now) {
            Ok((seqno, actions)) => {
                self.await_answer(seqno, query.reply);
                self.perform(actions).await;
            }
            Err(e) => {
                tracing::warn!(station = %self.node.name(), dest = %query.dest, error = %e, "query failed");
                let _ = query.reply.send(QueryAnswer::Unreachable);
            }
        }
    }

    /// Park `reply` until the answer for `seqno` arrives. Queries whose
    /// client already gave up are dropped here.
    fn await_answer(&mut self, seqno: i64, reply: oneshot::Sender<QueryAnswer>) {
        self.waiting.retain(|_, waiting| !waiting.is_closed());
        if let Some(stale) = self.waiting.insert(seqno, reply) {
            tracing::warn!(station = %self.node.name(), seqno, "seqno reused while still waiting");
            let _ = stale.send(QueryAnswer::Unreachable);
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { port, frame } => self.send(port, &frame).await,
                Action::Answer { seqno, answer } => match self.waiting.remove(&seqno) {
                    Some(reply) => {
                        if reply.send(answer).is_err() {
                            tracing::debug!(station = %self.node.name(), seqno, "client gone before answer");
                        }
                    }
                    None => tracing::warn!(station = %self.node.name(), seqno, "answer for unknown query"),
                },
            }
        }
    }

    async fn send(&self, port: u16, frame: &Frame) {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(station = %self.node.name(), port, error = %e, "cannot encode frame");
                return;
            }
        };
        match self.socket.send_to(&bytes, (self.host.as_str(), port)).await {
            Ok(_) => tracing::debug!(station = %self.node.name(), port, %frame, "frame sent"),
            Err(e) => tracing::warn!(station = %self.node.name(), port, error = %e, "udp send failed"),
        }
    }

    /// The timetable may be edited while the station runs.
    fn refresh_timetable(&mut self) {
        match self.timetable.refresh() {
            Ok(true) => self.node.set_timetable(self.timetable.timetable().clone()),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                station = %self.node.name(),
                error = %e,
                "timetable refresh failed, keeping previous"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_core::{parse_clock, FrameKind, NO_TIME};

    struct Fixture {
        dir: std::path::PathBuf,
    }

    impl Fixture {
        fn new(tag: &str, station: &str, timetable: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("transit-station-{tag}-{}", std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(TimetableFile::path_for(&dir, station), timetable).unwrap();
            Self { dir }
        }

        fn timetable(&self, station: &str) -> TimetableFile {
            TimetableFile::open(TimetableFile::path_for(&self.dir, station)).unwrap()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    async fn recv_frame(socket: &UdpSocket) -> (Frame, u16) {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("no frame within 5s")
            .unwrap();
        (Frame::decode(&buf[..len]).unwrap(), from.port())
    }

    #[tokio::test]
    async fn test_query_through_neighbour() {
        let fixture = Fixture::new("query", "A", "A,0,0\n08:00,busAB,stop1,08:20,B\n");

        let station_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let station_port = station_socket.local_addr().unwrap().port();
        let neighbour = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let neighbour_port = neighbour.local_addr().unwrap().port();

        let node = Node::new("A", [neighbour_port]);
        let station = Station::new(
            node,
            fixture.timetable("A"),
            station_socket,
            "127.0.0.1".into(),
            Clock::Fixed(parse_clock("07:30").unwrap()),
        );
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(station.run(rx, Duration::ZERO, token.clone()));

        // The station announces itself, then learns our name.
        let (announce, _) = recv_frame(&neighbour).await;
        assert_eq!(announce, Frame::name("A"));
        neighbour
            .send_to(&Frame::name("B").encode().unwrap(), ("127.0.0.1", station_port))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = StationHandle::new(tx);
        let query = tokio::spawn(async move { handle.query("D", Duration::from_secs(5)).await });

        let (request, _) = recv_frame(&neighbour).await;
        assert_eq!(request.kind, FrameKind::Request);
        assert_eq!(request.dest, "D");
        assert_eq!(request.time, parse_clock("08:20").unwrap());

        let mut src = request.src.clone();
        src.push("B".into());
        let reply = Frame::response("A", "D", src, request.seqno, parse_clock("09:05").unwrap());
        neighbour
            .send_to(&reply.encode().unwrap(), ("127.0.0.1", station_port))
            .await
            .unwrap();

        let answer = query.await.unwrap().unwrap();
        assert_eq!(
            answer,
            QueryAnswer::Arrival {
                time: parse_clock("09:05").unwrap(),
                itinerary: Some("busAB from stop1 at 8:00, arriving B at 8:20".into()),
            }
        );

        token.cancel();
        let node = task.await.unwrap();
        assert!(node.outstanding().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_ignored() {
        let fixture = Fixture::new("garbage", "A", "A,0,0\n");

        let station_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let station_port = station_socket.local_addr().unwrap().port();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let station = Station::new(
            Node::new("A", Vec::new()),
            fixture.timetable("A"),
            station_socket,
            "127.0.0.1".into(),
            Clock::Fixed(0),
        );
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(station.run(rx, Duration::ZERO, token.clone()));

        peer.send_to(b"not a frame", ("127.0.0.1", station_port)).await.unwrap();
        let stray = Frame::response("A", "D", vec!["A".into(), "B".into()], 5, NO_TIME);
        peer.send_to(&stray.encode().unwrap(), ("127.0.0.1", station_port)).await.unwrap();

        // Still serving queries afterwards.
        let handle = StationHandle::new(tx);
        assert_eq!(
            handle.query("A", Duration::from_secs(5)).await.unwrap(),
            QueryAnswer::AlreadyThere
        );
        assert_eq!(
            handle.query("D", Duration::from_secs(5)).await.unwrap(),
            QueryAnswer::Unreachable
        );

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_queries_are_forgotten() {
        let fixture = Fixture::new("abandoned", "A", "A,0,0\n");
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut station = Station::new(
            Node::new("A", Vec::new()),
            fixture.timetable("A"),
            socket,
            "127.0.0.1".into(),
            Clock::Fixed(0),
        );

        let (gone, gone_rx) = oneshot::channel();
        station.await_answer(0, gone);
        drop(gone_rx);
        let (live, mut live_rx) = oneshot::channel();
        station.await_answer(1, live);
        assert_eq!(station.waiting.len(), 1);

        // A reused seqno settles the old waiter instead of leaking it.
        let (again, _again_rx) = oneshot::channel();
        station.await_answer(1, again);
        assert_eq!(live_rx.try_recv().unwrap(), QueryAnswer::Unreachable);
        assert_eq!(station.waiting.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_station() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = StationHandle::new(tx);
        assert!(matches!(
            handle.query("D", Duration::from_secs(1)).await,
            Err(QueryError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let (tx, mut rx) = mpsc::channel::<QueryRequest>(1);
        // Hold on to the reply sender without answering.
        let holder = tokio::spawn(async move { rx.recv().await });
        let handle = StationHandle::new(tx);

        assert!(matches!(
            handle.query("D", Duration::from_millis(50)).await,
            Err(QueryError::Timeout(_))
        ));
        drop(holder);
    }
}
