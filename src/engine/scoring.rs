use crate::config::DispatchSettings;
use crate::engine::locator::{active_order_count, NearbyDriver};
use crate::models::assignment::ScoreBreakdown;
use crate::models::driver::DriverProfile;
use crate::state::AppState;

const DISTANCE_WEIGHT: f64 = 0.40;
const RATING_WEIGHT: f64 = 0.30;
const AVAILABILITY_WEIGHT: f64 = 0.20;
const WORKLOAD_WEIGHT: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct ScoringInput {
    pub distance_miles: f64,
    pub rating: Option<f64>,
    pub is_online: bool,
    pub active_orders: u32,
    pub max_orders: u32,
}

#[derive(Debug, Clone)]
pub struct RankedDriver {
    pub driver: DriverProfile,
    pub distance_miles: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Below `max_orders`, so the driver can take another order.
    pub has_capacity: bool,
}

pub fn compute_score(input: &ScoringInput, settings: &DispatchSettings) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        distance_score: distance_score(input.distance_miles, settings.search_radius_miles),
        rating_score: rating_score(input.rating.unwrap_or(settings.default_driver_rating)),
        availability_score: availability_score(input.is_online),
        workload_score: workload_score(input.active_orders, input.max_orders),
    };

    let score = weighted_score(&breakdown);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.distance_score * DISTANCE_WEIGHT)
        + (breakdown.rating_score * RATING_WEIGHT)
        + (breakdown.availability_score * AVAILABILITY_WEIGHT)
        + (breakdown.workload_score * WORKLOAD_WEIGHT)
}

/// Scores every nearby driver, best first.
pub fn rank_drivers(state: &AppState, nearby: &[NearbyDriver]) -> Vec<RankedDriver> {
    let mut ranked: Vec<RankedDriver> = nearby
        .iter()
        .map(|candidate| {
            let max_orders = state
                .availability
                .get(&candidate.driver.id)
                .map(|row| row.max_orders)
                .unwrap_or(state.settings.driver_max_orders);

            let active_orders = active_order_count(state, candidate.driver.id);
            let input = ScoringInput {
                distance_miles: candidate.distance_miles,
                rating: candidate.driver.rating,
                is_online: candidate.driver.is_online,
                active_orders,
                max_orders,
            };
            let (score, breakdown) = compute_score(&input, &state.settings);

            RankedDriver {
                driver: candidate.driver.clone(),
                distance_miles: candidate.distance_miles,
                score,
                breakdown,
                has_capacity: active_orders < max_orders,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.distance_miles.total_cmp(&b.distance_miles))
    });
    ranked
}

fn distance_score(distance_miles: f64, radius_miles: f64) -> f64 {
    if radius_miles <= 0.0 {
        return 0.0;
    }

    (1.0 - distance_miles.max(0.0) / radius_miles).max(0.0)
}

fn rating_score(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}

fn availability_score(is_online: bool) -> f64 {
    if is_online { 1.0 } else { 0.5 }
}

fn workload_score(active_orders: u32, max_orders: u32) -> f64 {
    if max_orders == 0 {
        return 0.0;
    }

    (1.0 - active_orders as f64 / max_orders as f64).max(0.0)
}
