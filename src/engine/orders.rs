use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::availability::{claim_slot, release_slot};
use crate::engine::notify::{notify_customer, CustomerNotice};
use crate::engine::queue::{enqueue_order, remove_from_queue};
use crate::error::AppError;
use crate::geo::{haversine_miles, GeoPoint};
use crate::models::driver::DriverStatus;
use crate::models::order::{ItemSize, Order, OrderStatus, Urgency};
use crate::pricing::{quote, round_cents};
use crate::state::{AppState, DispatchEvent};

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub customer_id: Uuid,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub item_description: Option<String>,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub item_size: ItemSize,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverStats {
    pub total_earnings: f64,
    pub completed_deliveries: usize,
    pub active_deliveries: usize,
}

/// Validates and stores a new order without dispatching it.
pub fn create_order(state: &AppState, request: NewOrder, now: DateTime<Utc>) -> Result<Order, AppError> {
    let pickup_address = request.pickup_address.trim().to_string();
    let delivery_address = request.delivery_address.trim().to_string();

    if pickup_address.is_empty() || delivery_address.is_empty() {
        return Err(AppError::BadRequest(
            "pickup and delivery addresses are required".to_string(),
        ));
    }

    for point in [request.pickup, request.dropoff].into_iter().flatten() {
        if !point.is_valid() {
            return Err(AppError::BadRequest("coordinates are out of range".to_string()));
        }
    }

    if let Some(total) = request.total {
        if !total.is_finite() || total < 0.0 {
            return Err(AppError::BadRequest("total must be >= 0".to_string()));
        }
    }

    if !state.customers.contains_key(&request.customer_id) {
        return Err(AppError::NotFound(format!(
            "customer {} not found",
            request.customer_id
        )));
    }

    let window_start = now - Duration::seconds(state.settings.duplicate_order_window_secs);
    let duplicate = state.orders.iter().any(|entry| {
        entry.customer_id == request.customer_id
            && entry.pickup_address == pickup_address
            && entry.delivery_address == delivery_address
            && entry.is_dispatchable()
            && entry.created_at >= window_start
    });
    if duplicate {
        return Err(AppError::Conflict(
            "a similar order was placed moments ago".to_string(),
        ));
    }

    let total = match request.total {
        Some(total) => round_cents(total),
        None => {
            let distance = match (request.pickup, request.dropoff) {
                (Some(pickup), Some(dropoff)) => haversine_miles(&pickup, &dropoff),
                _ => 0.0,
            };
            quote(distance, request.urgency, request.item_size).total
        }
    };

    let order = Order {
        id: Uuid::new_v4(),
        customer_id: request.customer_id,
        pickup_address,
        delivery_address,
        pickup: request.pickup,
        dropoff: request.dropoff,
        item_description: request.item_description,
        urgency: request.urgency,
        item_size: request.item_size,
        status: OrderStatus::Pending,
        driver_id: None,
        total,
        tip_amount: 0.0,
        created_at: now,
        updated_at: now,
        assigned_at: None,
    };

    state.orders.insert(order.id, order.clone());
    info!(order_id = %order.id, customer_id = %order.customer_id, total = order.total, "order placed");
    Ok(order)
}

/// Stores the order and hands it to the dispatch engine.
pub async fn place_order(state: &AppState, request: NewOrder) -> Result<Order, AppError> {
    let order = create_order(state, request, Utc::now())?;
    enqueue_order(state, order.clone()).await?;
    Ok(order)
}

pub fn accept_order(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let driver_status = state
        .drivers
        .get(&driver_id)
        .map(|driver| driver.status)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
    if driver_status != DriverStatus::Active {
        return Err(AppError::Conflict(format!("driver {driver_id} is not active")));
    }

    let (updated, newly_claimed) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        let assigned_to_caller =
            order.status == OrderStatus::Assigned && order.driver_id == Some(driver_id);
        if !assigned_to_caller && !order.is_dispatchable() {
            return Err(AppError::Conflict(format!(
                "order {order_id} is no longer available"
            )));
        }

        order.status = OrderStatus::Accepted;
        order.driver_id = Some(driver_id);
        order.assigned_at.get_or_insert(now);
        order.updated_at = now;
        (order.clone(), !assigned_to_caller)
    };

    if newly_claimed {
        claim_slot(state, driver_id);
    }
    remove_from_queue(state, order_id);

    info!(order_id = %order_id, driver_id = %driver_id, "order accepted");
    state.publish(DispatchEvent::OrderUpdated(updated.clone()));
    notify_customer(state, &updated, CustomerNotice::StatusChanged);

    Ok(updated)
}

/// Moves an accepted order along pickup → transit → delivery.
pub fn advance_status(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    next: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let updated = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.driver_id != Some(driver_id) {
            return Err(AppError::Forbidden(format!(
                "order {order_id} is not assigned to driver {driver_id}"
            )));
        }

        let allowed = matches!(
            (order.status, next),
            (OrderStatus::Accepted, OrderStatus::PickedUp)
                | (OrderStatus::PickedUp, OrderStatus::InTransit)
                | (OrderStatus::PickedUp, OrderStatus::Delivered)
                | (OrderStatus::InTransit, OrderStatus::Delivered)
        );
        if !allowed {
            return Err(AppError::BadRequest(format!(
                "cannot move order from {:?} to {:?}",
                order.status, next
            )));
        }

        order.status = next;
        order.updated_at = now;
        order.clone()
    };

    if next == OrderStatus::Delivered {
        release_slot(state, driver_id);
    }

    info!(order_id = %order_id, driver_id = %driver_id, status = ?next, "order status advanced");
    state.publish(DispatchEvent::OrderUpdated(updated.clone()));
    notify_customer(state, &updated, CustomerNotice::StatusChanged);

    Ok(updated)
}

/// Cancels an order that has not been picked up yet.
pub fn cancel_order(
    state: &AppState,
    order_id: Uuid,
    customer_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Order, AppError> {
    let (updated, released_driver) = {
        let mut order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.customer_id != customer_id {
            return Err(AppError::Forbidden(format!(
                "order {order_id} belongs to another customer"
            )));
        }

        let cancellable = order.status.is_open()
            || matches!(order.status, OrderStatus::Assigned | OrderStatus::Accepted);
        if !cancellable {
            return Err(AppError::Conflict(format!(
                "order {order_id} can no longer be cancelled"
            )));
        }

        let released_driver = order.driver_id.filter(|_| order.status.is_active());
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        (order.clone(), released_driver)
    };

    if let Some(driver_id) = released_driver {
        release_slot(state, driver_id);
    }
    remove_from_queue(state, order_id);

    info!(order_id = %order_id, "order cancelled");
    state.publish(DispatchEvent::OrderUpdated(updated.clone()));
    notify_customer(state, &updated, CustomerNotice::StatusChanged);

    Ok(updated)
}

pub fn add_tip(state: &AppState, order_id: Uuid, amount: f64, now: DateTime<Utc>) -> Result<Order, AppError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::BadRequest("tip must be a positive amount".to_string()));
    }

    let mut order = state
        .orders
        .get_mut(&order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.status == OrderStatus::Cancelled {
        return Err(AppError::Conflict(format!("order {order_id} is cancelled")));
    }

    order.tip_amount = round_cents(order.tip_amount + amount);
    order.total = round_cents(order.total + amount);
    order.updated_at = now;
    Ok(order.clone())
}

pub fn get_order(state: &AppState, order_id: Uuid) -> Result<Order, AppError> {
    state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))
}

/// Open orders nobody has claimed, newest first.
pub fn available_orders(state: &AppState) -> Vec<Order> {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| entry.is_dispatchable())
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

pub fn driver_active_orders(state: &AppState, driver_id: Uuid) -> Vec<Order> {
    let mut orders: Vec<Order> = state
        .orders
        .iter()
        .filter(|entry| entry.driver_id == Some(driver_id) && entry.status.is_active())
        .map(|entry| entry.value().clone())
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    orders
}

pub fn driver_stats(state: &AppState, driver_id: Uuid) -> Result<DriverStats, AppError> {
    if !state.drivers.contains_key(&driver_id) {
        return Err(AppError::NotFound(format!("driver {driver_id} not found")));
    }

    let mut stats = DriverStats {
        total_earnings: 0.0,
        completed_deliveries: 0,
        active_deliveries: 0,
    };

    for entry in state.orders.iter() {
        if entry.driver_id != Some(driver_id) {
            continue;
        }
        if entry.status == OrderStatus::Delivered {
            stats.total_earnings += entry.total;
            stats.completed_deliveries += 1;
        } else if entry.status.is_active() {
            stats.active_deliveries += 1;
        }
    }

    stats.total_earnings = round_cents(stats.total_earnings);
    Ok(stats)
}
