use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use transit_core::{Node, TimetableFile};

use crate::config::Settings;
use crate::error::StationError;
use crate::station::{Station, StationHandle};

pub async fn run(settings: Settings) -> Result<(), StationError> {
    tracing::info!(
        station = %settings.name,
        pid = std::process::id(),
        tcp_port = settings.tcp_port,
        udp_port = settings.udp_port,
        neighbours = ?settings.neighbours,
        "station starting"
    );

    // --- Timetable ---
    let timetable = TimetableFile::open(&settings.timetable_path)?;
    tracing::info!(
        path = %timetable.path().display(),
        journeys = timetable.timetable().len(),
        "timetable loaded"
    );

    // --- Sockets ---
    let udp_addr = format!("{}:{}", settings.host, settings.udp_port);
    let socket = UdpSocket::bind(&udp_addr)
        .await
        .map_err(|source| StationError::Bind { what: "udp", addr: udp_addr.clone(), source })?;
    let tcp_addr = format!("{}:{}", settings.host, settings.tcp_port);
    let listener = TcpListener::bind(&tcp_addr)
        .await
        .map_err(|source| StationError::Bind { what: "tcp", addr: tcp_addr.clone(), source })?;

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Station task: sole owner of the node ---
    let (tx, rx) = mpsc::channel(settings.channel_buffer);
    let node = Node::new(settings.name.clone(), settings.neighbours.iter().copied());
    let station = Station::new(node, timetable, socket, settings.host.clone(), settings.clock);
    let station_task = tokio::spawn(station.run(rx, settings.startup_delay, token.clone()));
    tracing::info!(delay = ?settings.startup_delay, "waiting for neighbours to bind");

    // --- HTTP (browser queries) ---
    let http_token = token.clone();
    let handle = StationHandle::new(tx);
    let query_timeout = settings.query_timeout;
    let http_task = tokio::spawn(async move {
        crate::http::run(listener, handle, query_timeout, http_token).await
    });
    tracing::info!(addr = %tcp_addr, "http listening");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    token.cancel();

    let http_result = match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(result)) => result.map_err(StationError::Http),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "http task panicked");
            Ok(())
        }
        Err(_) => {
            tracing::warn!("http server did not stop in time");
            Ok(())
        }
    };

    match station_task.await {
        Ok(node) => tracing::info!(
            station = %node.name(),
            frames_sent = node.frames_sent(),
            "shutdown complete"
        ),
        Err(e) => tracing::error!(error = %e, "station task panicked"),
    }
    http_result
}
