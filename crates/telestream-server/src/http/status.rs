use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub(crate) struct StatusBody {
    server_status: &'static str,
    uptime: String,
    version: &'static str,
    connections: usize,
    loads: BTreeMap<String, usize>,
}

pub(crate) async fn handle(State(state): State<AppState>) -> Json<StatusBody> {
    let loads = state
        .pool
        .loads()
        .into_iter()
        .enumerate()
        .map(|(id, load)| (format!("connection{id}"), load))
        .collect();

    Json(StatusBody {
        server_status: "running",
        uptime: readable_duration(state.started_at().elapsed()),
        version: env!("CARGO_PKG_VERSION"),
        connections: state.pool.len(),
        loads,
    })
}

/// `1d:2h:3m:4s`, omitting leading zero units.
fn readable_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let parts = [
        (secs / 86_400, "d"),
        (secs / 3_600 % 24, "h"),
        (secs / 60 % 60, "m"),
        (secs % 60, "s"),
    ];

    let first = parts
        .iter()
        .position(|(value, _)| *value > 0)
        .unwrap_or(parts.len() - 1);
    parts[first..]
        .iter()
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(":")
}
