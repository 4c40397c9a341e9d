use crate::monitor::{Monitor, MonitorStatus, SystemSnapshot};
use crate::telemetry::{Event, EventOrder};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub order: EventOrder,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PeakResponse {
    pub circuit: u8,
    pub name: String,
    pub peak_w: f64,
}

pub async fn get_snapshot(State(monitor): State<Arc<Monitor>>) -> Json<SystemSnapshot> {
    Json(monitor.current_snapshot())
}

pub async fn get_events(
    State(monitor): State<Arc<Monitor>>,
    Query(params): Query<EventsQuery>,
) -> Json<Vec<Event>> {
    let mut events = monitor.recent_events(params.order);
    if let Some(limit) = params.limit {
        events.truncate(limit);
    }
    Json(events)
}

pub async fn get_peaks(State(monitor): State<Arc<Monitor>>) -> Json<BTreeMap<u8, f64>> {
    Json(monitor.peaks())
}

pub async fn get_peak(
    State(monitor): State<Arc<Monitor>>,
    Path(circuit): Path<u8>,
) -> Result<Json<PeakResponse>, StatusCode> {
    let peak_w = monitor.peak(circuit).ok_or(StatusCode::NOT_FOUND)?;
    let name = monitor
        .config()
        .circuits
        .iter()
        .find(|c| c.index == circuit)
        .map(|c| c.name.clone())
        .unwrap_or_default();
    Ok(Json(PeakResponse {
        circuit,
        name,
        peak_w,
    }))
}

pub async fn get_status(State(monitor): State<Arc<Monitor>>) -> Json<MonitorStatus> {
    Json(monitor.status())
}
