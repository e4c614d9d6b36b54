use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::config::{Config, DispatchSettings};
use crate::engine::notify::OutboundMessage;
use crate::models::assignment::Assignment;
use crate::models::customer::CustomerProfile;
use crate::models::driver::{DriverAvailability, DriverProfile};
use crate::models::notification::{Notification, NotificationQueueEntry};
use crate::models::order::Order;
use crate::observability::metrics::Metrics;

/// Realtime change feed pushed to websocket subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DispatchEvent {
    Assignment(Assignment),
    Notification(Notification),
    OrderUpdated(Order),
}

pub struct AppState {
    pub drivers: DashMap<Uuid, DriverProfile>,
    pub availability: DashMap<Uuid, DriverAvailability>,
    pub customers: DashMap<Uuid, CustomerProfile>,
    pub orders: DashMap<Uuid, Order>,
    pub assignments: DashMap<Uuid, Assignment>,
    pub notifications: DashMap<Uuid, Notification>,
    /// Retry queue keyed by order id, at most one entry per order.
    pub retry_queue: DashMap<Uuid, NotificationQueueEntry>,
    pub order_tx: mpsc::Sender<Order>,
    pub outbound_tx: mpsc::Sender<OutboundMessage>,
    pub events_tx: broadcast::Sender<DispatchEvent>,
    pub settings: DispatchSettings,
    pub metrics: Metrics,
}

pub struct EngineChannels {
    pub order_rx: mpsc::Receiver<Order>,
    pub outbound_rx: mpsc::Receiver<OutboundMessage>,
}

impl AppState {
    pub fn new(
        settings: DispatchSettings,
        order_queue_size: usize,
        event_buffer_size: usize,
        outbound_buffer_size: usize,
    ) -> (Self, EngineChannels) {
        let (order_tx, order_rx) = mpsc::channel(order_queue_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer_size);
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        (
            Self {
                drivers: DashMap::new(),
                availability: DashMap::new(),
                customers: DashMap::new(),
                orders: DashMap::new(),
                assignments: DashMap::new(),
                notifications: DashMap::new(),
                retry_queue: DashMap::new(),
                order_tx,
                outbound_tx,
                events_tx,
                settings,
                metrics: Metrics::new(),
            },
            EngineChannels {
                order_rx,
                outbound_rx,
            },
        )
    }

    pub fn from_config(config: &Config) -> (Self, EngineChannels) {
        Self::new(
            config.dispatch.clone(),
            config.order_queue_size,
            config.event_buffer_size,
            config.outbound_buffer_size,
        )
    }

    pub fn publish(&self, event: DispatchEvent) {
        // No subscribers is the common case outside of live dashboards.
        let _ = self.events_tx.send(event);
    }
}
