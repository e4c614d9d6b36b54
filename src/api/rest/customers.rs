use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::notify::{mark_read, recipient_notifications};
use crate::error::AppError;
use crate::models::customer::CustomerProfile;
use crate::models::notification::{Notification, Recipient};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/customers", post(create_customer))
        .route("/customers/:id/notifications", get(notifications))
        .route("/notifications/:id/read", post(read_notification))
}

#[derive(Deserialize)]
pub struct CreateCustomerRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

async fn create_customer(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<Json<CustomerProfile>, AppError> {
    if payload.full_name.trim().is_empty() {
        return Err(AppError::BadRequest("full_name cannot be empty".to_string()));
    }

    let customer = CustomerProfile {
        id: Uuid::new_v4(),
        full_name: payload.full_name.trim().to_string(),
        email: payload.email.filter(|email| !email.trim().is_empty()),
        phone: payload.phone.filter(|phone| !phone.trim().is_empty()),
    };

    state.customers.insert(customer.id, customer.clone());
    Ok(Json(customer))
}

async fn notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<Notification>> {
    Json(recipient_notifications(&state, Recipient::Customer(id)))
}

async fn read_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    mark_read(&state, id).map(Json)
}
