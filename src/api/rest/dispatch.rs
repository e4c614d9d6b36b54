use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::broadcast::{broadcast_to_online_drivers, BroadcastOutcome};
use crate::engine::notify::recipient_notifications;
use crate::engine::queue::{drain_due, queued_entries, DrainReport};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::notification::{Notification, NotificationQueueEntry, Recipient};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dispatch/broadcast", post(broadcast))
        .route("/dispatch/queue", get(list_queue))
        .route("/dispatch/queue/drain", post(drain_queue))
        .route("/assignments", get(list_assignments))
        .route("/admin/alerts", get(admin_alerts))
}

#[derive(Deserialize)]
pub struct BroadcastRequest {
    pub order_id: Uuid,
}

async fn broadcast(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BroadcastRequest>,
) -> Result<Json<BroadcastOutcome>, AppError> {
    broadcast_to_online_drivers(&state, payload.order_id, Utc::now()).map(Json)
}

async fn list_queue(State(state): State<Arc<AppState>>) -> Json<Vec<NotificationQueueEntry>> {
    Json(queued_entries(&state))
}

async fn drain_queue(State(state): State<Arc<AppState>>) -> Json<DrainReport> {
    Json(drain_due(&state, Utc::now()))
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    let mut assignments: Vec<Assignment> = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    assignments.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at));

    Json(assignments)
}

async fn admin_alerts(State(state): State<Arc<AppState>>) -> Json<Vec<Notification>> {
    Json(recipient_notifications(&state, Recipient::Admin))
}
