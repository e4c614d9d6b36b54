use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::availability::claim_slot;
use crate::engine::broadcast::{broadcast_to_all_drivers, broadcast_to_online_drivers, BroadcastOutcome};
use crate::engine::locator::find_nearby_drivers;
use crate::engine::notify::{
    notify_customer, notify_driver, raise_admin_alert, AdminAlert, CustomerNotice, DriverNotice,
};
use crate::engine::queue::add_to_queue;
use crate::engine::scoring::{rank_drivers, RankedDriver};
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus};
use crate::state::{AppState, DispatchEvent};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The order was taken or closed before the engine got to it.
    Skipped,
    /// No pickup coordinates, so every online driver was asked.
    Broadcast(BroadcastOutcome),
    NoDriversNearby { drivers_broadcast: usize },
    AutoAssigned(Assignment),
    DriversNotified { drivers: usize, best_score: f64 },
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Skipped => "skipped",
            DispatchOutcome::Broadcast(_) => "broadcast",
            DispatchOutcome::NoDriversNearby { .. } => "no_drivers",
            DispatchOutcome::AutoAssigned(_) => "assigned",
            DispatchOutcome::DriversNotified { .. } => "notified",
        }
    }
}

pub async fn run_dispatch_engine(state: Arc<AppState>, mut order_rx: mpsc::Receiver<Order>) {
    info!("dispatch engine started");

    while let Some(order) = order_rx.recv().await {
        state.metrics.orders_in_queue.dec();

        let start = Instant::now();
        let outcome = match process_new_order(&state, &order) {
            Ok(outcome) => outcome.label(),
            Err(err) => {
                error!(order_id = %order.id, error = %err, "failed to dispatch order");
                "error"
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        state
            .metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed);
        state
            .metrics
            .dispatch_total
            .with_label_values(&[outcome])
            .inc();
    }

    warn!("dispatch engine stopped: order channel closed");
}

/// Runs the full dispatch sequence for a newly placed order.
///
/// On failure the order still goes out to online drivers and an admin alert
/// is raised before the error is returned.
pub fn process_new_order(state: &AppState, order: &Order) -> Result<DispatchOutcome, AppError> {
    info!(order_id = %order.id, "processing new order");

    notify_customer(state, order, CustomerNotice::OrderCreated);

    match dispatch(state, order.id) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if let Err(broadcast_err) = broadcast_to_online_drivers(state, order.id, Utc::now()) {
                error!(order_id = %order.id, error = %broadcast_err, "fallback broadcast failed");
            }
            let detail = err.to_string();
            raise_admin_alert(state, AdminAlert::DispatchFailed, order, Some(&detail));
            Err(err)
        }
    }
}

fn dispatch(state: &AppState, order_id: Uuid) -> Result<DispatchOutcome, AppError> {
    let order = current_order(state, order_id)?;
    if !order.is_dispatchable() {
        info!(order_id = %order.id, status = ?order.status, "order no longer needs a driver");
        return Ok(DispatchOutcome::Skipped);
    }

    let Some(pickup) = order.pickup else {
        info!(order_id = %order.id, "no pickup coordinates, broadcasting to online drivers");
        let outcome = broadcast_to_online_drivers(state, order.id, Utc::now())?;
        return Ok(DispatchOutcome::Broadcast(outcome));
    };

    let nearby = find_nearby_drivers(state, &pickup, state.settings.search_radius_miles);
    info!(order_id = %order.id, nearby = nearby.len(), "nearby drivers found");

    if nearby.is_empty() {
        return Ok(handle_no_drivers(state, &order));
    }

    let ranked = rank_drivers(state, &nearby);
    let best = ranked
        .first()
        .ok_or_else(|| AppError::Internal("failed to rank drivers".to_string()))?;

    let threshold = state.settings.auto_assign_threshold;
    let winner = ranked
        .iter()
        .find(|candidate| candidate.has_capacity)
        .filter(|candidate| candidate.score > threshold);

    if let Some(winner) = winner {
        return assign_or_skip(state, order.id, winner);
    }

    if best.score > threshold {
        info!(order_id = %order.id, driver_id = %best.driver.id, "best driver is at capacity, notifying instead");
    }

    let shortlist = &ranked[..ranked.len().min(state.settings.max_notified_drivers)];
    info!(order_id = %order.id, drivers = shortlist.len(), best_score = best.score, "notifying nearby drivers");

    for candidate in shortlist {
        if let Err(err) = notify_driver(state, &candidate.driver, &order, DriverNotice::Available) {
            warn!(driver_id = %candidate.driver.id, error = %err, "driver push failed");
        }
    }

    set_status_if_open(state, order.id, OrderStatus::DriverNotified);

    Ok(DispatchOutcome::DriversNotified {
        drivers: shortlist.len(),
        best_score: best.score,
    })
}

fn handle_no_drivers(state: &AppState, order: &Order) -> DispatchOutcome {
    warn!(order_id = %order.id, "no drivers near pickup");

    raise_admin_alert(state, AdminAlert::NoDriversAvailable, order, None);
    set_status_if_open(state, order.id, OrderStatus::NoDriversAvailable);
    add_to_queue(state, order.id, Utc::now());
    let drivers_broadcast = broadcast_to_all_drivers(state, order);

    DispatchOutcome::NoDriversNearby { drivers_broadcast }
}

/// Auto-assigns, treating an order someone else took in the meantime as
/// skipped rather than failed.
fn assign_or_skip(state: &AppState, order_id: Uuid, winner: &RankedDriver) -> Result<DispatchOutcome, AppError> {
    match auto_assign(state, order_id, winner) {
        Ok(assignment) => Ok(DispatchOutcome::AutoAssigned(assignment)),
        Err(AppError::Conflict(reason)) => {
            info!(order_id = %order_id, reason = %reason, "order taken before auto-assign");
            Ok(DispatchOutcome::Skipped)
        }
        Err(err) => Err(err),
    }
}

/// Hands the order to `winner`. Fails with `Conflict` when someone else got
/// there first.
pub fn auto_assign(state: &AppState, order_id: Uuid, winner: &RankedDriver) -> Result<Assignment, AppError> {
    let now = Utc::now();
    let driver_id = winner.driver.id;

    let updated = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !order.is_dispatchable() {
            return Err(AppError::Conflict(format!("order {order_id} is no longer available")));
        }

        order.status = OrderStatus::Assigned;
        order.driver_id = Some(driver_id);
        order.assigned_at = Some(now);
        order.updated_at = now;
        order.clone()
    };

    claim_slot(state, driver_id);

    let assignment = Assignment {
        id: Uuid::new_v4(),
        order_id,
        driver_id,
        score: winner.score,
        distance_miles: winner.distance_miles,
        score_breakdown: winner.breakdown.clone(),
        assigned_at: now,
    };
    state.assignments.insert(assignment.id, assignment.clone());
    state.publish(DispatchEvent::Assignment(assignment.clone()));
    state.publish(DispatchEvent::OrderUpdated(updated.clone()));

    info!(
        order_id = %order_id,
        driver_id = %driver_id,
        score = winner.score,
        distance_miles = winner.distance_miles,
        "order auto-assigned"
    );

    if let Err(err) = notify_driver(state, &winner.driver, &updated, DriverNotice::Assigned) {
        warn!(driver_id = %driver_id, error = %err, "assignment push failed");
    }
    notify_customer(state, &updated, CustomerNotice::DriverAssigned);

    Ok(assignment)
}

fn current_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

fn set_status_if_open(state: &AppState, order_id: Uuid, status: OrderStatus) {
    let updated = state.orders.get_mut(&order_id).and_then(|mut order| {
        if !order.is_dispatchable() {
            return None;
        }
        order.status = status;
        order.updated_at = Utc::now();
        Some(order.clone())
    });

    if let Some(order) = updated {
        state.publish(DispatchEvent::OrderUpdated(order));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{assign_or_skip, auto_assign, process_new_order, DispatchOutcome};
    use crate::engine::locator::find_nearby_drivers;
    use crate::engine::scoring::rank_drivers;
    use crate::config::DispatchSettings;
    use crate::engine::notify::recipient_notifications;
    use crate::error::AppError;
    use crate::geo::GeoPoint;
    use crate::models::customer::CustomerProfile;
    use crate::models::driver::{DriverAvailability, DriverProfile, DriverStatus};
    use crate::models::notification::Recipient;
    use crate::models::order::{ItemSize, Order, OrderStatus, Urgency};
    use crate::state::{AppState, EngineChannels};

    const PICKUP: GeoPoint = GeoPoint { lat: 40.7128, lng: -74.0060 };

    fn state() -> (AppState, EngineChannels) {
        AppState::new(DispatchSettings::default(), 16, 16, 256)
    }

    fn customer(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        state.customers.insert(
            id,
            CustomerProfile {
                id,
                full_name: "Casey Customer".to_string(),
                email: Some("casey@example.com".to_string()),
                phone: Some("555-010-0000".to_string()),
            },
        );
        id
    }

    fn order(state: &AppState, pickup: Option<GeoPoint>) -> Order {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_id: customer(state),
            pickup_address: "1 Main St".to_string(),
            delivery_address: "9 Elm St".to_string(),
            pickup,
            dropoff: None,
            item_description: Some("brake pads".to_string()),
            urgency: Urgency::Standard,
            item_size: ItemSize::Small,
            status: OrderStatus::Pending,
            driver_id: None,
            total: 18.25,
            tip_amount: 0.0,
            created_at: now,
            updated_at: now,
            assigned_at: None,
        };
        state.orders.insert(order.id, order.clone());
        order
    }

    fn driver(state: &AppState, location: Option<GeoPoint>, is_online: bool, rating: Option<f64>) -> Uuid {
        let id = Uuid::new_v4();
        state.drivers.insert(
            id,
            DriverProfile {
                id,
                full_name: "Dana Driver".to_string(),
                email: None,
                phone: Some("+15550100001".to_string()),
                status: DriverStatus::Active,
                is_online,
                is_approved: true,
                onboarding_completed: true,
                location,
                rating,
                updated_at: Utc::now(),
            },
        );
        state.availability.insert(
            id,
            DriverAvailability {
                driver_id: id,
                is_online,
                is_available: is_online,
                max_orders: 3,
                current_orders: 0,
                last_seen: Utc::now(),
            },
        );
        id
    }

    #[test]
    fn close_idle_driver_is_auto_assigned() {
        let (state, _channels) = state();
        let driver_id = driver(&state, Some(GeoPoint { lat: 40.7130, lng: -74.0062 }), true, None);
        let order = order(&state, Some(PICKUP));

        let outcome = process_new_order(&state, &order).unwrap();
        let DispatchOutcome::AutoAssigned(assignment) = outcome else {
            panic!("expected auto assignment, got {outcome:?}");
        };
        assert_eq!(assignment.driver_id, driver_id);

        let stored = state.orders.get(&order.id).unwrap().clone();
        assert_eq!(stored.status, OrderStatus::Assigned);
        assert_eq!(stored.driver_id, Some(driver_id));
        assert!(stored.assigned_at.is_some());
        assert_eq!(state.availability.get(&driver_id).unwrap().current_orders, 1);

        let inbox = recipient_notifications(&state, Recipient::Driver(driver_id));
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, "assigned");

        let customer_inbox = recipient_notifications(&state, Recipient::Customer(order.customer_id));
        let kinds: Vec<&str> = customer_inbox.iter().map(|n| n.kind.as_str()).collect();
        assert!(kinds.contains(&"order_created"));
        assert!(kinds.contains(&"driver_assigned"));
    }

    #[test]
    fn low_scoring_drivers_are_notified_instead_of_assigned() {
        let (state, _channels) = state();
        // ~13 miles out, offline, low rating: well under the threshold.
        let far = GeoPoint { lat: 40.9, lng: -74.0060 };
        let ids: Vec<Uuid> = (0..7).map(|_| driver(&state, Some(far), false, Some(1.0))).collect();
        let order = order(&state, Some(PICKUP));

        let outcome = process_new_order(&state, &order).unwrap();
        match outcome {
            DispatchOutcome::DriversNotified { drivers, best_score } => {
                assert_eq!(drivers, 5);
                assert!(best_score <= 0.7);
            }
            other => panic!("expected drivers notified, got {other:?}"),
        }

        let stored = state.orders.get(&order.id).unwrap().clone();
        assert_eq!(stored.status, OrderStatus::DriverNotified);
        assert!(stored.driver_id.is_none());

        let notified = ids
            .iter()
            .filter(|id| !recipient_notifications(&state, Recipient::Driver(**id)).is_empty())
            .count();
        assert_eq!(notified, 5);
    }

    #[test]
    fn no_nearby_drivers_queues_and_alerts() {
        let (state, _channels) = state();
        let far_away = driver(&state, Some(GeoPoint { lat: 34.05, lng: -118.24 }), false, None);
        let order = order(&state, Some(PICKUP));

        let outcome = process_new_order(&state, &order).unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::NoDriversNearby { drivers_broadcast: 1 }
        ));

        assert_eq!(
            state.orders.get(&order.id).unwrap().status,
            OrderStatus::NoDriversAvailable
        );
        assert!(state.retry_queue.contains_key(&order.id));

        let alerts = recipient_notifications(&state, Recipient::Admin);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, "no_drivers_available");

        let inbox = recipient_notifications(&state, Recipient::Driver(far_away));
        assert_eq!(inbox[0].kind, "broadcast");
        assert_eq!(inbox[0].data["is_broadcast"], true);
    }

    #[test]
    fn missing_coordinates_fall_back_to_online_broadcast() {
        let (state, _channels) = state();
        let online = driver(&state, None, true, None);
        let offline = driver(&state, None, false, None);
        let order = order(&state, None);

        let outcome = process_new_order(&state, &order).unwrap();
        match outcome {
            DispatchOutcome::Broadcast(super::BroadcastOutcome::Notified {
                drivers_notified,
                total_drivers,
                ..
            }) => {
                assert_eq!(drivers_notified, 1);
                assert_eq!(total_drivers, 1);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }

        assert_eq!(recipient_notifications(&state, Recipient::Driver(online)).len(), 1);
        assert!(recipient_notifications(&state, Recipient::Driver(offline)).is_empty());
    }

    #[test]
    fn already_taken_order_is_skipped() {
        let (state, _channels) = state();
        driver(&state, Some(PICKUP), true, None);
        let order = order(&state, Some(PICKUP));
        state.orders.get_mut(&order.id).unwrap().status = OrderStatus::Accepted;

        let outcome = process_new_order(&state, &order).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Skipped));
        assert!(state.assignments.is_empty());
    }

    #[test]
    fn missing_order_raises_dispatch_alert() {
        let (state, _channels) = state();
        let order = order(&state, Some(PICKUP));
        state.orders.remove(&order.id);

        let result = process_new_order(&state, &order);
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let alerts = recipient_notifications(&state, Recipient::Admin);
        assert_eq!(alerts[0].kind, "dispatch_failed");
    }

    #[test]
    fn driver_at_capacity_is_notified_not_assigned() {
        let (state, _channels) = state();
        let driver_id = driver(&state, Some(PICKUP), true, None);
        for _ in 0..3 {
            let busy = order(&state, Some(PICKUP));
            let mut stored = state.orders.get_mut(&busy.id).unwrap();
            stored.status = OrderStatus::Accepted;
            stored.driver_id = Some(driver_id);
        }
        let order = order(&state, Some(PICKUP));

        let outcome = process_new_order(&state, &order).unwrap();
        match outcome {
            DispatchOutcome::DriversNotified { drivers, best_score } => {
                assert_eq!(drivers, 1);
                // 0.4 + 0.24 + 0.2 + 0.0, above the threshold but full
                assert!(best_score > state.settings.auto_assign_threshold);
            }
            other => panic!("expected drivers notified, got {other:?}"),
        }

        assert!(state.assignments.is_empty());
        let stored = state.orders.get(&order.id).unwrap().clone();
        assert_eq!(stored.status, OrderStatus::DriverNotified);
        assert!(stored.driver_id.is_none());
    }

    #[test]
    fn spare_driver_wins_over_full_one() {
        let (state, _channels) = state();
        let full = driver(&state, Some(PICKUP), true, Some(5.0));
        for _ in 0..3 {
            let busy = order(&state, Some(PICKUP));
            let mut stored = state.orders.get_mut(&busy.id).unwrap();
            stored.status = OrderStatus::PickedUp;
            stored.driver_id = Some(full);
        }
        // Scores below the full driver (0.9) but still above the threshold.
        let spare = driver(&state, Some(GeoPoint { lat: 40.7150, lng: -74.0060 }), true, Some(2.5));
        let order = order(&state, Some(PICKUP));

        let outcome = process_new_order(&state, &order).unwrap();
        let DispatchOutcome::AutoAssigned(assignment) = outcome else {
            panic!("expected auto assignment, got {outcome:?}");
        };
        assert_eq!(assignment.driver_id, spare);
    }

    #[test]
    fn auto_assign_refuses_order_taken_after_ranking() {
        let (state, _channels) = state();
        driver(&state, Some(PICKUP), true, None);
        let order = order(&state, Some(PICKUP));

        let nearby = find_nearby_drivers(&state, &PICKUP, state.settings.search_radius_miles);
        let ranked = rank_drivers(&state, &nearby);
        state.orders.get_mut(&order.id).unwrap().status = OrderStatus::Accepted;

        let result = auto_assign(&state, order.id, &ranked[0]);
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(state.assignments.is_empty());
    }

    #[test]
    fn losing_the_assign_race_is_skipped_without_alert() {
        let (state, _channels) = state();
        driver(&state, Some(PICKUP), true, None);
        let order = order(&state, Some(PICKUP));

        let nearby = find_nearby_drivers(&state, &PICKUP, state.settings.search_radius_miles);
        let ranked = rank_drivers(&state, &nearby);
        state.orders.get_mut(&order.id).unwrap().status = OrderStatus::Accepted;

        let outcome = assign_or_skip(&state, order.id, &ranked[0]).unwrap();
        assert!(matches!(outcome, DispatchOutcome::Skipped));
        assert!(recipient_notifications(&state, Recipient::Admin).is_empty());
    }
}
