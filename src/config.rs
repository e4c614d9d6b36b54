use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub order_queue_size: usize,
    pub event_buffer_size: usize,
    pub outbound_buffer_size: usize,
    pub dispatch: DispatchSettings,
}

/// Tunables for driver matching, the retry queue and order intake.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub search_radius_miles: f64,
    pub auto_assign_threshold: f64,
    pub max_notified_drivers: usize,
    pub driver_max_orders: u32,
    pub online_window_secs: i64,
    pub default_driver_rating: f64,
    pub queue_poll_interval_secs: u64,
    pub queue_retry_base_secs: i64,
    pub queue_max_attempts: u32,
    pub duplicate_order_window_secs: i64,
    pub app_url: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            search_radius_miles: 15.0,
            auto_assign_threshold: 0.7,
            max_notified_drivers: 5,
            driver_max_orders: 3,
            online_window_secs: 60 * 60,
            default_driver_rating: 4.0,
            queue_poll_interval_secs: 30,
            queue_retry_base_secs: 60,
            queue_max_attempts: 10,
            duplicate_order_window_secs: 60,
            app_url: "https://my-runner.com".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = DispatchSettings::default();

        let dispatch = DispatchSettings {
            search_radius_miles: parse_or_default(
                "SEARCH_RADIUS_MILES",
                defaults.search_radius_miles,
            )?,
            auto_assign_threshold: parse_or_default(
                "AUTO_ASSIGN_THRESHOLD",
                defaults.auto_assign_threshold,
            )?,
            max_notified_drivers: parse_or_default(
                "MAX_NOTIFIED_DRIVERS",
                defaults.max_notified_drivers,
            )?,
            driver_max_orders: parse_or_default("DRIVER_MAX_ORDERS", defaults.driver_max_orders)?,
            online_window_secs: parse_or_default("ONLINE_WINDOW_SECS", defaults.online_window_secs)?,
            default_driver_rating: parse_or_default(
                "DEFAULT_DRIVER_RATING",
                defaults.default_driver_rating,
            )?,
            queue_poll_interval_secs: parse_or_default(
                "QUEUE_POLL_INTERVAL_SECS",
                defaults.queue_poll_interval_secs,
            )?,
            queue_retry_base_secs: parse_or_default(
                "QUEUE_RETRY_BASE_SECS",
                defaults.queue_retry_base_secs,
            )?,
            queue_max_attempts: parse_or_default("QUEUE_MAX_ATTEMPTS", defaults.queue_max_attempts)?,
            duplicate_order_window_secs: parse_or_default(
                "DUPLICATE_ORDER_WINDOW_SECS",
                defaults.duplicate_order_window_secs,
            )?,
            app_url: env::var("APP_URL").unwrap_or(defaults.app_url),
        };

        if dispatch.queue_poll_interval_secs == 0 {
            return Err(AppError::Config(
                "invalid QUEUE_POLL_INTERVAL_SECS: must be > 0".to_string(),
            ));
        }

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            order_queue_size: parse_or_default("ORDER_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            outbound_buffer_size: parse_or_default("OUTBOUND_BUFFER_SIZE", 1024)?,
            dispatch,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
