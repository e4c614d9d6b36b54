use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::notification::Recipient;
use crate::state::{AppState, DispatchEvent};

/// Restricts the feed to one driver's or customer's events.
#[derive(Debug, Default, Deserialize)]
pub struct FeedFilter {
    pub driver_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
}

impl FeedFilter {
    pub fn matches(&self, event: &DispatchEvent) -> bool {
        if self.driver_id.is_none() && self.customer_id.is_none() {
            return true;
        }

        match event {
            DispatchEvent::Assignment(assignment) => self.driver_id == Some(assignment.driver_id),
            DispatchEvent::Notification(notification) => match notification.recipient {
                Recipient::Driver(id) => self.driver_id == Some(id),
                Recipient::Customer(id) => self.customer_id == Some(id),
                Recipient::Admin => false,
            },
            DispatchEvent::OrderUpdated(order) => {
                self.customer_id == Some(order.customer_id)
                    || (self.driver_id.is_some() && self.driver_id == order.driver_id)
            }
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(filter): Query<FeedFilter>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: FeedFilter) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events_tx.subscribe());

    info!(driver_id = ?filter.driver_id, customer_id = ?filter.customer_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "websocket subscriber lagged");
                    continue;
                }
            };

            if !filter.matches(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
