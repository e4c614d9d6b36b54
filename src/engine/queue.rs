use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::broadcast::{broadcast_to_online_drivers, BroadcastOutcome};
use crate::engine::notify::{notify_driver, raise_admin_alert, AdminAlert, DriverNotice};
use crate::error::AppError;
use crate::models::notification::NotificationQueueEntry;
use crate::models::order::Order;
use crate::state::AppState;

const MAX_RETRY_DELAY_SECS: i64 = 60 * 60;

/// Hands an order to the dispatch engine. The depth gauge is bumped before
/// the send so the engine's decrement never runs first.
pub async fn enqueue_order(state: &AppState, order: Order) -> Result<(), AppError> {
    state.metrics.orders_in_queue.inc();

    if let Err(err) = state.order_tx.send(order).await {
        state.metrics.orders_in_queue.dec();
        return Err(AppError::Internal(format!("order queue send failed: {err}")));
    }

    Ok(())
}

/// Parks an order for later re-broadcast. An order is queued at most once;
/// the existing entry is returned when it is already waiting.
pub fn add_to_queue(state: &AppState, order_id: Uuid, now: DateTime<Utc>) -> NotificationQueueEntry {
    let entry = state
        .retry_queue
        .entry(order_id)
        .or_insert_with(|| {
            info!(order_id = %order_id, "order added to retry queue");
            NotificationQueueEntry::new(order_id, now)
        })
        .clone();

    state.metrics.retry_queue_depth.set(state.retry_queue.len() as i64);
    entry
}

pub fn remove_from_queue(state: &AppState, order_id: Uuid) -> bool {
    let removed = state.retry_queue.remove(&order_id).is_some();
    if removed {
        debug!(order_id = %order_id, "order removed from retry queue");
        state.metrics.retry_queue_depth.set(state.retry_queue.len() as i64);
    }
    removed
}

pub fn queued_entries(state: &AppState) -> Vec<NotificationQueueEntry> {
    let mut entries: Vec<NotificationQueueEntry> = state
        .retry_queue
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    entries
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DrainReport {
    pub due: usize,
    pub rebroadcast: usize,
    pub drivers_notified: usize,
    pub dropped: usize,
    pub exhausted: usize,
}

/// Backoff before attempt `attempts + 1`: base, 2x base, 4x base, ... capped
/// at one hour.
pub fn retry_delay(base_secs: i64, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = base_secs.max(1).saturating_mul(1_i64 << exponent);
    Duration::seconds(delay.min(MAX_RETRY_DELAY_SECS))
}

/// Retries every due entry once.
pub fn drain_due(state: &AppState, now: DateTime<Utc>) -> DrainReport {
    let due: Vec<NotificationQueueEntry> = state
        .retry_queue
        .iter()
        .filter(|entry| entry.is_due(now))
        .map(|entry| entry.value().clone())
        .collect();

    let mut report = DrainReport {
        due: due.len(),
        ..DrainReport::default()
    };

    for entry in due {
        let order = state
            .orders
            .get(&entry.order_id)
            .map(|order| order.value().clone());

        let Some(order) = order.filter(Order::is_dispatchable) else {
            remove_from_queue(state, entry.order_id);
            report.dropped += 1;
            continue;
        };

        if entry.attempts >= state.settings.queue_max_attempts {
            remove_from_queue(state, entry.order_id);
            raise_admin_alert(state, AdminAlert::QueueExhausted, &order, None);
            report.exhausted += 1;
            continue;
        }

        match broadcast_to_online_drivers(state, order.id, now) {
            Ok(BroadcastOutcome::Notified {
                drivers_notified, ..
            }) => {
                report.rebroadcast += 1;
                report.drivers_notified += drivers_notified;
            }
            Ok(BroadcastOutcome::Queued { .. }) => {
                debug!(order_id = %order.id, "still no online drivers for queued order");
            }
            Ok(BroadcastOutcome::Skipped { .. }) => {
                remove_from_queue(state, order.id);
                report.dropped += 1;
                continue;
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "queued order re-broadcast failed");
            }
        }

        if let Some(mut queued) = state.retry_queue.get_mut(&order.id) {
            queued.attempts += 1;
            queued.last_attempt_at = Some(now);
            queued.next_attempt_at =
                now + retry_delay(state.settings.queue_retry_base_secs, queued.attempts);
        }
    }

    if report.due > 0 {
        info!(
            due = report.due,
            rebroadcast = report.rebroadcast,
            dropped = report.dropped,
            exhausted = report.exhausted,
            "retry queue drained"
        );
    }

    report
}

/// Tells a driver who just came online about every order still waiting in
/// the queue. Returns the number of orders the driver was told about.
pub fn check_queued_orders_for_driver(state: &AppState, driver_id: Uuid) -> Result<usize, AppError> {
    let driver = state
        .drivers
        .get(&driver_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let waiting: Vec<Order> = queued_entries(state)
        .into_iter()
        .filter_map(|entry| {
            state
                .orders
                .get(&entry.order_id)
                .map(|order| order.value().clone())
        })
        .filter(Order::is_dispatchable)
        .collect();

    let mut notified = 0;
    for order in &waiting {
        match notify_driver(state, &driver, order, DriverNotice::Available) {
            Ok(()) => notified += 1,
            Err(err) => {
                warn!(driver_id = %driver_id, order_id = %order.id, error = %err, "queued order notification failed");
            }
        }
    }

    if !waiting.is_empty() {
        info!(driver_id = %driver_id, orders = waiting.len(), "driver told about queued orders");
    }

    Ok(notified)
}

pub async fn run_queue_drainer(state: Arc<AppState>) {
    let period = std::time::Duration::from_secs(state.settings.queue_poll_interval_secs);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval_secs = state.settings.queue_poll_interval_secs, "retry queue drainer started");

    loop {
        ticker.tick().await;
        drain_due(&state, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{add_to_queue, drain_due, enqueue_order, retry_delay};
    use crate::config::DispatchSettings;
    use crate::models::driver::{DriverAvailability, DriverProfile, DriverStatus};
    use crate::models::notification::Recipient;
    use crate::models::order::{ItemSize, Order, OrderStatus, Urgency};
    use crate::state::{AppState, EngineChannels};

    fn state() -> (AppState, EngineChannels) {
        let settings = DispatchSettings {
            queue_max_attempts: 2,
            ..DispatchSettings::default()
        };
        AppState::new(settings, 16, 16, 64)
    }

    fn pending_order(state: &AppState) -> Order {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            pickup_address: "1 Main St".to_string(),
            delivery_address: "9 Elm St".to_string(),
            pickup: None,
            dropoff: None,
            item_description: None,
            urgency: Urgency::Standard,
            item_size: ItemSize::Small,
            status: OrderStatus::Pending,
            driver_id: None,
            total: 12.5,
            tip_amount: 0.0,
            created_at: now,
            updated_at: now,
            assigned_at: None,
        };
        state.orders.insert(order.id, order.clone());
        order
    }

    fn online_driver(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        state.drivers.insert(
            id,
            DriverProfile {
                id,
                full_name: "Online Olive".to_string(),
                email: None,
                phone: None,
                status: DriverStatus::Active,
                is_online: true,
                is_approved: true,
                onboarding_completed: true,
                location: None,
                rating: None,
                updated_at: Utc::now(),
            },
        );
        state.availability.insert(
            id,
            DriverAvailability {
                driver_id: id,
                is_online: true,
                is_available: true,
                max_orders: 3,
                current_orders: 0,
                last_seen: Utc::now(),
            },
        );
        id
    }

    #[test]
    fn adding_twice_keeps_a_single_entry() {
        let (state, _channels) = state();
        let order = pending_order(&state);
        let now = Utc::now();

        let first = add_to_queue(&state, order.id, now);
        let second = add_to_queue(&state, order.id, now + Duration::seconds(5));

        assert_eq!(first.id, second.id);
        assert_eq!(state.retry_queue.len(), 1);
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(60, 1), Duration::seconds(60));
        assert_eq!(retry_delay(60, 2), Duration::seconds(120));
        assert_eq!(retry_delay(60, 3), Duration::seconds(240));
        assert_eq!(retry_delay(60, 40), Duration::seconds(3600));
    }

    #[test]
    fn closed_orders_are_dropped_from_the_queue() {
        let (state, _channels) = state();
        let order = pending_order(&state);
        add_to_queue(&state, order.id, Utc::now());
        state.orders.get_mut(&order.id).unwrap().status = OrderStatus::Cancelled;

        let report = drain_due(&state, Utc::now());
        assert_eq!(report.dropped, 1);
        assert!(state.retry_queue.is_empty());
    }

    #[test]
    fn entries_wait_for_backoff_and_exhaust() {
        let (state, _channels) = state();
        let order = pending_order(&state);
        let start = Utc::now();
        add_to_queue(&state, order.id, start);

        // No driver online: attempt is recorded and rescheduled.
        let report = drain_due(&state, start);
        assert_eq!(report.due, 1);
        let entry = state.retry_queue.get(&order.id).unwrap().clone();
        assert_eq!(entry.attempts, 1);
        assert!(entry.next_attempt_at > start);

        // Not due yet.
        assert_eq!(drain_due(&state, start + Duration::seconds(1)).due, 0);

        let later = start + Duration::hours(2);
        drain_due(&state, later);
        let report = drain_due(&state, later + Duration::hours(2));
        assert_eq!(report.exhausted, 1);
        assert!(state.retry_queue.is_empty());

        let alerts = crate::engine::notify::recipient_notifications(&state, Recipient::Admin);
        assert!(alerts.iter().any(|alert| alert.kind == "queue_exhausted"));
    }

    #[test]
    fn online_driver_receives_queued_order() {
        let (state, _channels) = state();
        let order = pending_order(&state);
        add_to_queue(&state, order.id, Utc::now());
        let driver_id = online_driver(&state);

        let report = drain_due(&state, Utc::now());
        assert_eq!(report.rebroadcast, 1);
        assert_eq!(report.drivers_notified, 1);

        let inbox =
            crate::engine::notify::recipient_notifications(&state, Recipient::Driver(driver_id));
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "New Order Available!");
    }

    #[test]
    fn driver_coming_online_hears_about_waiting_orders() {
        let (state, _channels) = state();
        let order = pending_order(&state);
        add_to_queue(&state, order.id, Utc::now());
        let driver_id = online_driver(&state);

        let notified = super::check_queued_orders_for_driver(&state, driver_id).unwrap();
        assert_eq!(notified, 1);
    }

    #[tokio::test]
    async fn enqueue_counts_order_before_engine_picks_it_up() {
        let (state, mut channels) = state();
        let order = pending_order(&state);

        enqueue_order(&state, order.clone()).await.unwrap();
        assert_eq!(state.metrics.orders_in_queue.get(), 1);

        let received = channels.order_rx.recv().await.unwrap();
        assert_eq!(received.id, order.id);
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_gauge_untouched() {
        let (state, channels) = state();
        drop(channels);
        let order = pending_order(&state);

        assert!(enqueue_order(&state, order).await.is_err());
        assert_eq!(state.metrics.orders_in_queue.get(), 0);
    }
}
