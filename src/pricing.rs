use serde::Serialize;

use crate::models::order::{ItemSize, Urgency};

pub const BASE_FEE: f64 = 5.99;
pub const PER_MILE: f64 = 2.00;

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub distance_miles: f64,
    pub base_fee: f64,
    pub distance_fee: f64,
    pub urgency_multiplier: f64,
    pub size_multiplier: f64,
    pub total: f64,
    pub estimated_time: &'static str,
}

pub fn quote(distance_miles: f64, urgency: Urgency, item_size: ItemSize) -> Quote {
    let distance_miles = if distance_miles.is_finite() {
        distance_miles.max(0.0)
    } else {
        0.0
    };
    let distance_fee = distance_miles * PER_MILE;
    let urgency_multiplier = urgency_multiplier(urgency);
    let size_multiplier = size_multiplier(item_size);

    Quote {
        distance_miles: round_cents(distance_miles),
        base_fee: BASE_FEE,
        distance_fee: round_cents(distance_fee),
        urgency_multiplier,
        size_multiplier,
        total: round_cents((BASE_FEE + distance_fee) * urgency_multiplier * size_multiplier),
        estimated_time: estimated_time(urgency),
    }
}

fn urgency_multiplier(urgency: Urgency) -> f64 {
    match urgency {
        Urgency::Urgent => 1.3,
        Urgency::Standard => 1.0,
        Urgency::Scheduled => 0.9,
    }
}

fn size_multiplier(item_size: ItemSize) -> f64 {
    match item_size {
        ItemSize::Small => 1.0,
        ItemSize::Medium => 1.1,
        ItemSize::Large => 1.25,
        ItemSize::ExtraLarge => 1.5,
    }
}

fn estimated_time(urgency: Urgency) -> &'static str {
    match urgency {
        Urgency::Urgent => "30-60 minutes",
        Urgency::Standard => "1-2 hours",
        Urgency::Scheduled => "Scheduled delivery",
    }
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::quote;
    use crate::models::order::{ItemSize, Urgency};

    #[test]
    fn zero_distance_standard_small_is_base_fee() {
        let q = quote(0.0, Urgency::Standard, ItemSize::Small);
        assert_eq!(q.total, 5.99);
        assert_eq!(q.estimated_time, "1-2 hours");
    }

    #[test]
    fn multipliers_compound() {
        // (5.99 + 10 * 2.00) * 1.3 * 1.5 = 50.6805
        let q = quote(10.0, Urgency::Urgent, ItemSize::ExtraLarge);
        assert_eq!(q.distance_fee, 20.0);
        assert_eq!(q.total, 50.68);
    }

    #[test]
    fn negative_or_nan_distance_is_treated_as_zero() {
        assert_eq!(quote(-4.0, Urgency::Standard, ItemSize::Small).total, 5.99);
        assert_eq!(quote(f64::NAN, Urgency::Standard, ItemSize::Small).total, 5.99);
    }

    #[test]
    fn scheduled_delivery_is_discounted() {
        let q = quote(5.0, Urgency::Scheduled, ItemSize::Medium);
        // (5.99 + 10.00) * 0.9 * 1.1 = 15.8301
        assert_eq!(q.total, 15.83);
    }
}
