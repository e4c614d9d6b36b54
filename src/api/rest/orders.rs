use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::orders::{self, NewOrder};
use crate::error::AppError;
use crate::geo::{haversine_miles, GeoPoint};
use crate::models::order::{ItemSize, Order, OrderStatus, Urgency};
use crate::pricing::{quote, Quote};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/available", get(available_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/status", post(update_status))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/tip", post(add_tip))
        .route("/quotes", post(create_quote))
}

#[derive(Deserialize)]
pub struct AcceptOrderRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub driver_id: Uuid,
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub customer_id: Uuid,
}

#[derive(Deserialize)]
pub struct TipRequest {
    pub amount: f64,
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub distance_miles: Option<f64>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub item_size: ItemSize,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<Order>, AppError> {
    orders::place_order(&state, payload).await.map(Json)
}

async fn available_orders(State(state): State<Arc<AppState>>) -> Json<Vec<Order>> {
    Json(orders::available_orders(&state))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    orders::get_order(&state, id).map(Json)
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptOrderRequest>,
) -> Result<Json<Order>, AppError> {
    orders::accept_order(&state, id, payload.driver_id, Utc::now()).map(Json)
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    orders::advance_status(&state, id, payload.driver_id, payload.status, Utc::now()).map(Json)
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<Order>, AppError> {
    orders::cancel_order(&state, id, payload.customer_id, Utc::now()).map(Json)
}

async fn add_tip(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TipRequest>,
) -> Result<Json<Order>, AppError> {
    orders::add_tip(&state, id, payload.amount, Utc::now()).map(Json)
}

async fn create_quote(Json(payload): Json<QuoteRequest>) -> Result<Json<Quote>, AppError> {
    let distance = match (payload.distance_miles, payload.pickup, payload.dropoff) {
        (Some(distance), _, _) => distance,
        (None, Some(pickup), Some(dropoff)) => {
            if !pickup.is_valid() || !dropoff.is_valid() {
                return Err(AppError::BadRequest("coordinates are out of range".to_string()));
            }
            haversine_miles(&pickup, &dropoff)
        }
        _ => {
            return Err(AppError::BadRequest(
                "distance_miles or both pickup and dropoff are required".to_string(),
            ));
        }
    };

    Ok(Json(quote(distance, payload.urgency, payload.item_size)))
}
