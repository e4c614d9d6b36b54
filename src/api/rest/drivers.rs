use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::availability;
use crate::engine::notify::recipient_notifications;
use crate::engine::orders::{driver_active_orders, driver_stats, DriverStats};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{DriverAvailability, DriverProfile, DriverStatus};
use crate::models::notification::{Notification, Recipient};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/online", post(go_online))
        .route("/drivers/:id/offline", post(go_offline))
        .route("/drivers/:id/heartbeat", post(heartbeat))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/orders", get(active_orders))
        .route("/drivers/:id/stats", get(stats))
        .route("/drivers/:id/notifications", get(notifications))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<GeoPoint>,
    pub rating: Option<f64>,
    #[serde(default = "default_true")]
    pub is_approved: bool,
    #[serde(default = "default_true")]
    pub onboarding_completed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    if payload.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("full_name cannot be empty".to_string()));
    }

    if let Some(location) = payload.location {
        if !location.is_valid() {
            return Err(AppError::BadRequest("location is out of range".to_string()));
        }
    }

    let driver = DriverProfile {
        id: Uuid::new_v4(),
        full_name: payload.full_name.trim().to_string(),
        email: payload.email,
        phone: payload.phone,
        status: DriverStatus::Inactive,
        is_online: false,
        is_approved: payload.is_approved,
        onboarding_completed: payload.onboarding_completed,
        location: payload.location,
        rating: payload.rating.map(|rating| rating.clamp(0.0, 5.0)),
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverProfile>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverProfile>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", id)))?;

    Ok(Json(driver.value().clone()))
}

async fn go_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailability>, AppError> {
    availability::go_online(&state, id, Utc::now()).map(Json)
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailability>, AppError> {
    availability::go_offline(&state, id, Utc::now()).map(Json)
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailability>, AppError> {
    availability::heartbeat(&state, id, Utc::now()).map(Json)
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DriverProfile>, AppError> {
    availability::update_location(&state, id, payload.location, Utc::now()).map(Json)
}

async fn active_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Order>> {
    Json(driver_active_orders(&state, id))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverStats>, AppError> {
    driver_stats(&state, id).map(Json)
}

async fn notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Notification>> {
    Json(recipient_notifications(&state, Recipient::Driver(id)))
}
