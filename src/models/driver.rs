use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: DriverStatus,
    pub is_online: bool,
    pub is_approved: bool,
    pub onboarding_completed: bool,
    pub location: Option<GeoPoint>,
    pub rating: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl DriverProfile {
    /// Approved and onboarded; the audience for "all drivers" broadcasts.
    pub fn is_broadcast_eligible(&self) -> bool {
        self.is_approved && self.onboarding_completed && self.status != DriverStatus::Suspended
    }
}

/// Presence row refreshed by the driver app while it is open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAvailability {
    pub driver_id: Uuid,
    pub is_online: bool,
    pub is_available: bool,
    pub max_orders: u32,
    pub current_orders: u32,
    pub last_seen: DateTime<Utc>,
}

impl DriverAvailability {
    pub fn seen_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen >= cutoff
    }
}
