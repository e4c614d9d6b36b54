use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::geo::{haversine_miles, GeoPoint};
use crate::models::driver::{DriverProfile, DriverStatus};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct NearbyDriver {
    pub driver: DriverProfile,
    pub distance_miles: f64,
}

/// Which presence check produced the online driver list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineTier {
    RecentlySeen,
    MarkedOnline,
    None,
}

/// Active drivers with a known location inside `radius_miles`, nearest first.
pub fn find_nearby_drivers(state: &AppState, pickup: &GeoPoint, radius_miles: f64) -> Vec<NearbyDriver> {
    let mut nearby: Vec<NearbyDriver> = state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if driver.status != DriverStatus::Active {
                return None;
            }

            let location = driver.location?;
            let distance_miles = haversine_miles(pickup, &location);
            (distance_miles <= radius_miles).then(|| NearbyDriver {
                driver: driver.clone(),
                distance_miles,
            })
        })
        .collect();

    nearby.sort_by(|a, b| {
        a.distance_miles
            .total_cmp(&b.distance_miles)
            .then_with(|| a.driver.id.cmp(&b.driver.id))
    });
    nearby
}

/// Active drivers whose presence row says they are online.
///
/// Drivers seen within the online window are preferred. When none qualify the
/// window is dropped and any driver still flagged online is returned, since a
/// missed heartbeat should not hide a driver with the app open.
pub fn find_online_drivers(state: &AppState, now: DateTime<Utc>) -> (Vec<DriverProfile>, OnlineTier) {
    let active = active_drivers(state);
    if active.is_empty() {
        return (active, OnlineTier::None);
    }

    let cutoff = now - Duration::seconds(state.settings.online_window_secs);
    let recent: Vec<DriverProfile> = active
        .iter()
        .filter(|driver| {
            state
                .availability
                .get(&driver.id)
                .is_some_and(|row| row.is_online && row.seen_since(cutoff))
        })
        .cloned()
        .collect();

    if !recent.is_empty() {
        debug!(count = recent.len(), "online drivers found within presence window");
        return (recent, OnlineTier::RecentlySeen);
    }

    info!(
        window_secs = state.settings.online_window_secs,
        "no recently seen drivers, falling back to online flag"
    );

    let marked: Vec<DriverProfile> = active
        .into_iter()
        .filter(|driver| {
            state
                .availability
                .get(&driver.id)
                .is_some_and(|row| row.is_online)
        })
        .collect();

    if marked.is_empty() {
        (marked, OnlineTier::None)
    } else {
        (marked, OnlineTier::MarkedOnline)
    }
}

/// Every approved, onboarded driver regardless of presence.
pub fn broadcast_candidates(state: &AppState) -> Vec<DriverProfile> {
    let mut drivers: Vec<DriverProfile> = state
        .drivers
        .iter()
        .filter(|entry| entry.is_broadcast_eligible())
        .map(|entry| entry.value().clone())
        .collect();
    drivers.sort_by_key(|driver| driver.id);
    drivers
}

pub fn active_order_count(state: &AppState, driver_id: Uuid) -> u32 {
    state
        .orders
        .iter()
        .filter(|entry| entry.driver_id == Some(driver_id) && entry.status.is_active())
        .count() as u32
}

fn active_drivers(state: &AppState) -> Vec<DriverProfile> {
    let mut drivers: Vec<DriverProfile> = state
        .drivers
        .iter()
        .filter(|entry| entry.status == DriverStatus::Active)
        .map(|entry| entry.value().clone())
        .collect();
    drivers.sort_by_key(|driver| driver.id);
    drivers
}
