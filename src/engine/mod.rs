pub mod availability;
pub mod broadcast;
pub mod dispatch;
pub mod locator;
pub mod notify;
pub mod orders;
pub mod queue;
pub mod scoring;
