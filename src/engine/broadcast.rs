use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::locator::{broadcast_candidates, find_online_drivers, OnlineTier};
use crate::engine::notify::{notify_driver, DriverNotice};
use crate::engine::queue::add_to_queue;
use crate::error::AppError;
use crate::models::order::Order;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct DriverNotifyResult {
    pub driver_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    /// The order no longer needs a driver.
    Skipped { reason: String },
    /// Nobody is online; the order waits in the retry queue.
    Queued { queue_entry_id: Uuid },
    Notified {
        drivers_notified: usize,
        total_drivers: usize,
        results: Vec<DriverNotifyResult>,
    },
}

/// Sends the order to every online driver, or parks it in the retry queue
/// when nobody is online.
pub fn broadcast_to_online_drivers(
    state: &AppState,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<BroadcastOutcome, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if !order.status.is_open() {
        info!(order_id = %order.id, status = ?order.status, "order no longer open, skipping broadcast");
        return Ok(BroadcastOutcome::Skipped {
            reason: format!("order status is {:?}", order.status),
        });
    }

    if order.driver_id.is_some() {
        info!(order_id = %order.id, "order already has a driver, skipping broadcast");
        return Ok(BroadcastOutcome::Skipped {
            reason: "order already has a driver".to_string(),
        });
    }

    let (drivers, tier) = find_online_drivers(state, now);
    if tier == OnlineTier::None {
        warn!(order_id = %order.id, "no online drivers to notify, adding order to retry queue");
        let entry = add_to_queue(state, order.id, now);
        return Ok(BroadcastOutcome::Queued {
            queue_entry_id: entry.id,
        });
    }

    info!(order_id = %order.id, drivers = drivers.len(), tier = ?tier, "broadcasting order to online drivers");

    let results: Vec<DriverNotifyResult> = drivers
        .iter()
        .map(|driver| match notify_driver(state, driver, &order, DriverNotice::OnlineBroadcast) {
            Ok(()) => DriverNotifyResult {
                driver_id: driver.id,
                success: true,
                error: None,
            },
            Err(err) => {
                warn!(driver_id = %driver.id, error = %err, "push notification failed");
                DriverNotifyResult {
                    driver_id: driver.id,
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        })
        .collect();

    Ok(BroadcastOutcome::Notified {
        drivers_notified: results.iter().filter(|result| result.success).count(),
        total_drivers: results.len(),
        results,
    })
}

/// In-app notice to every approved driver, online or not. Returns how many
/// drivers were reached.
pub fn broadcast_to_all_drivers(state: &AppState, order: &Order) -> usize {
    let drivers = broadcast_candidates(state);
    if drivers.is_empty() {
        info!(order_id = %order.id, "no approved drivers to broadcast to");
        return 0;
    }

    let online = drivers.iter().filter(|driver| driver.is_online).count();
    info!(
        order_id = %order.id,
        online,
        offline = drivers.len() - online,
        "broadcasting order to all drivers"
    );

    drivers
        .iter()
        .filter(|driver| {
            match notify_driver(state, driver, order, DriverNotice::WaitingBroadcast) {
                Ok(()) => true,
                Err(err) => {
                    warn!(driver_id = %driver.id, error = %err, "broadcast notification failed");
                    false
                }
            }
        })
        .count()
}
