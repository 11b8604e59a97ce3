//! HTTP surface of the administration service.

use crate::state::{AppState, RegisterOutcome};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use voltring_core::types::{PlantId, PlantInfo};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/plants", get(list_plants).post(register_plant))
        .route("/plants/{id}", get(get_plant))
        .route("/statistics/co2/average", get(co2_average))
        .with_state(state)
}

async fn list_plants(State(state): State<Arc<AppState>>) -> Json<Vec<PlantInfo>> {
    Json(state.plants.all())
}

async fn register_plant(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlantInfo>, JsonRejection>,
) -> Response {
    let Json(plant) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("rejected unreadable registration body: {rejection}");
            return bad_request(rejection.to_string());
        }
    };
    if let Err(reason) = plant.validate() {
        warn!("rejected invalid registration: {reason}");
        return bad_request(reason);
    }
    match state.plants.register(plant.clone()) {
        RegisterOutcome::Registered(existing) => (StatusCode::CREATED, Json(existing)).into_response(),
        RegisterOutcome::Duplicate => {
            warn!("rejected duplicate registration for plant {}", plant.plant_id);
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": format!("plant id {} already exists", plant.plant_id) })),
            )
                .into_response()
        }
    }
}

async fn get_plant(
    State(state): State<Arc<AppState>>,
    Path(plant_id): Path<PlantId>,
) -> Response {
    match state.plants.find(plant_id) {
        Some(plant) => Json(plant).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no plant with id {plant_id}") })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TimeRange {
    t1: u64,
    t2: u64,
}

async fn co2_average(
    State(state): State<Arc<AppState>>,
    Query(range): Query<TimeRange>,
) -> Response {
    info!(
        "CO2 average requested for range [{}, {}]",
        range.t1, range.t2
    );
    if range.t1 > range.t2 {
        return bad_request("t1 must not be after t2");
    }
    match state.measurements.average_co2_between(range.t1, range.t2) {
        Some(average) => Json(average).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no CO2 data found for the specified time range" })),
        )
            .into_response(),
    }
}

fn bad_request(reason: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": reason.into() })),
    )
        .into_response()
}
