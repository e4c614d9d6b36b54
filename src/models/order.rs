use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Urgent,
    #[default]
    Standard,
    Scheduled,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemSize {
    #[default]
    Small,
    Medium,
    Large,
    ExtraLarge,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    DriverNotified,
    NoDriversAvailable,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Statuses in which the order still waits for a driver.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::DriverNotified | OrderStatus::NoDriversAvailable
        )
    }

    /// Statuses that count against a driver's workload.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub pickup_address: String,
    pub delivery_address: String,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub item_description: Option<String>,
    pub urgency: Urgency,
    pub item_size: ItemSize,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub total: f64,
    pub tip_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Open and not yet claimed by any driver.
    pub fn is_dispatchable(&self) -> bool {
        self.status.is_open() && self.driver_id.is_none()
    }

    /// Last eight characters of the id, as shown to people.
    pub fn short_id(&self) -> String {
        let id = self.id.to_string();
        id[id.len() - 8..].to_string()
    }
}
