use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use transit_core::{format_clock, QueryAnswer};

use crate::error::QueryError;
use crate::station::StationHandle;

#[derive(Clone)]
struct AppState {
    station: StationHandle,
    timeout: Duration,
}

pub fn router(station: StationHandle, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(handle_query))
        .with_state(AppState { station, timeout })
}

/// Serve browser queries until `shutdown` fires.
pub async fn run(
    listener: tokio::net::TcpListener,
    station: StationHandle,
    timeout: Duration,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(station, timeout))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

// ═══════════════════════════════════════════════════════════════
//  GET /?to=<station>
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct JourneyParams {
    to: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Query(params): Query<JourneyParams>,
) -> impl IntoResponse {
    let Some(dest) = params.to.filter(|d| !d.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Ouch! bad request\n".to_string());
    };
    let dest = dest.trim();

    match state.station.query(dest, state.timeout).await {
        Ok(answer) => (StatusCode::OK, render_answer(&answer)),
        Err(e @ QueryError::Timeout(_)) => {
            tracing::warn!(dest, error = %e, "query timed out");
            (StatusCode::GATEWAY_TIMEOUT, format!("error: {e}\n"))
        }
        Err(e @ QueryError::Stopped) => (StatusCode::SERVICE_UNAVAILABLE, format!("error: {e}\n")),
    }
}

fn render_answer(answer: &QueryAnswer) -> String {
    let (arrival, next_leg) = match answer {
        QueryAnswer::Arrival { time, itinerary } => (
            format_clock(*time),
            itinerary.clone().unwrap_or_else(|| "None".into()),
        ),
        QueryAnswer::Unreachable => ("couldn't get there".into(), "None".into()),
        QueryAnswer::AlreadyThere => ("already there".into(), "None".into()),
    };
    format!("Arrival time: {arrival}\nNext leg of trip: {next_leg}\n")
}
