use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::locator::active_order_count;
use crate::engine::queue::check_queued_orders_for_driver;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{DriverAvailability, DriverProfile, DriverStatus};
use crate::state::AppState;

/// Marks the driver online, refreshes the presence row and tells them about
/// any orders still waiting in the retry queue.
pub fn go_online(state: &AppState, driver_id: Uuid, now: DateTime<Utc>) -> Result<DriverAvailability, AppError> {
    {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        if driver.status == DriverStatus::Suspended {
            return Err(AppError::Conflict(format!("driver {driver_id} is suspended")));
        }

        driver.is_online = true;
        driver.status = DriverStatus::Active;
        driver.updated_at = now;
    }

    let current_orders = active_order_count(state, driver_id);
    let max_orders = state.settings.driver_max_orders;
    let availability = DriverAvailability {
        driver_id,
        is_online: true,
        is_available: current_orders < max_orders,
        max_orders,
        current_orders,
        last_seen: now,
    };
    state.availability.insert(driver_id, availability.clone());
    record_utilization(state, &availability);

    info!(driver_id = %driver_id, current_orders, "driver online");

    if let Err(err) = check_queued_orders_for_driver(state, driver_id) {
        warn!(driver_id = %driver_id, error = %err, "failed to check queued orders for driver");
    }

    Ok(availability)
}

pub fn go_offline(state: &AppState, driver_id: Uuid, now: DateTime<Utc>) -> Result<DriverAvailability, AppError> {
    {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        driver.is_online = false;
        if driver.status == DriverStatus::Active {
            driver.status = DriverStatus::Inactive;
        }
        driver.updated_at = now;
    }

    let availability = {
        let mut row = state
            .availability
            .entry(driver_id)
            .or_insert_with(|| DriverAvailability {
                driver_id,
                is_online: false,
                is_available: false,
                max_orders: state.settings.driver_max_orders,
                current_orders: 0,
                last_seen: now,
            });
        row.is_online = false;
        row.is_available = false;
        row.last_seen = now;
        row.clone()
    };

    info!(driver_id = %driver_id, "driver offline");
    Ok(availability)
}

/// Refreshes `last_seen` so the driver stays inside the presence window.
pub fn heartbeat(state: &AppState, driver_id: Uuid, now: DateTime<Utc>) -> Result<DriverAvailability, AppError> {
    let mut row = state
        .availability
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("no availability for driver {driver_id}")))?;

    row.last_seen = now;
    Ok(row.clone())
}

pub fn update_location(
    state: &AppState,
    driver_id: Uuid,
    location: GeoPoint,
    now: DateTime<Utc>,
) -> Result<DriverProfile, AppError> {
    if !location.is_valid() {
        return Err(AppError::BadRequest("location is out of range".to_string()));
    }

    let mut driver = state
        .drivers
        .get_mut(&driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    driver.location = Some(location);
    driver.updated_at = now;
    Ok(driver.clone())
}

/// Counts a newly taken order against the driver's capacity.
pub fn claim_slot(state: &AppState, driver_id: Uuid) {
    if let Some(mut row) = state.availability.get_mut(&driver_id) {
        row.current_orders = row.current_orders.saturating_add(1);
        row.is_available = row.is_online && row.current_orders < row.max_orders;
        record_utilization(state, &row);
    }
}

pub fn release_slot(state: &AppState, driver_id: Uuid) {
    if let Some(mut row) = state.availability.get_mut(&driver_id) {
        row.current_orders = row.current_orders.saturating_sub(1);
        row.is_available = row.is_online && row.current_orders < row.max_orders;
        record_utilization(state, &row);
    }
}

fn record_utilization(state: &AppState, row: &DriverAvailability) {
    let utilization = if row.max_orders == 0 {
        1.0
    } else {
        (row.current_orders as f64 / row.max_orders as f64).min(1.0)
    };
    state
        .metrics
        .driver_utilization
        .with_label_values(&[&row.driver_id.to_string()])
        .set(utilization);
}
