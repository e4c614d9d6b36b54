//! Notification fan-out.
//!
//! Every notification is first written as an in-app row and published on the
//! realtime feed. Push, SMS and e-mail deliveries are handed to the outbound
//! relay, which is where provider clients are bound.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::DriverProfile;
use crate::models::notification::{AlertPriority, Notification, NotificationStatus, Recipient};
use crate::models::order::Order;
use crate::state::{AppState, DispatchEvent};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum OutboundMessage {
    Push {
        user_id: Uuid,
        title: String,
        body: String,
        data: Value,
    },
    Sms {
        to: String,
        body: String,
    },
    Email {
        to: String,
        subject: String,
        html: String,
        text: String,
    },
}

impl OutboundMessage {
    pub fn email(to: &str, subject: &str, html: String, text: Option<String>) -> Self {
        let text = text.unwrap_or_else(|| strip_tags(&html));
        OutboundMessage::Email {
            to: to.to_string(),
            subject: subject.to_string(),
            html,
            text,
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            OutboundMessage::Push { .. } => "push",
            OutboundMessage::Sms { .. } => "sms",
            OutboundMessage::Email { .. } => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverNotice {
    /// The engine picked this driver.
    Assigned,
    /// The driver is one of the nearby candidates.
    Available,
    /// The order was broadcast to every online driver.
    OnlineBroadcast,
    /// Nobody was nearby; every approved driver hears about it, in-app only.
    WaitingBroadcast,
}

impl DriverNotice {
    fn kind(self) -> &'static str {
        match self {
            DriverNotice::Assigned => "assigned",
            DriverNotice::Available | DriverNotice::OnlineBroadcast => "available",
            DriverNotice::WaitingBroadcast => "broadcast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerNotice {
    OrderCreated,
    DriverAssigned,
    StatusChanged,
}

impl CustomerNotice {
    fn kind(self) -> &'static str {
        match self {
            CustomerNotice::OrderCreated => "order_created",
            CustomerNotice::DriverAssigned => "driver_assigned",
            CustomerNotice::StatusChanged => "status_changed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAlert {
    NoDriversAvailable,
    DispatchFailed,
    QueueExhausted,
}

impl AdminAlert {
    fn kind(self) -> &'static str {
        match self {
            AdminAlert::NoDriversAvailable => "no_drivers_available",
            AdminAlert::DispatchFailed => "dispatch_failed",
            AdminAlert::QueueExhausted => "queue_exhausted",
        }
    }
}

struct DriverMessage {
    title: &'static str,
    body: String,
    push: bool,
    sms: Option<String>,
    data: Value,
}

fn driver_message(order: &Order, notice: DriverNotice) -> DriverMessage {
    let short_id = order.short_id();
    let total = format_money(order.total);

    match notice {
        DriverNotice::Assigned | DriverNotice::Available => {
            let (title, body) = if notice == DriverNotice::Assigned {
                (
                    "Order Assigned",
                    format!("ORDER ASSIGNED: You've been assigned order #{short_id} - {total}"),
                )
            } else {
                (
                    "Order Available",
                    format!("NEW ORDER: Order #{short_id} available - {total}"),
                )
            };
            DriverMessage {
                title,
                sms: Some(body.clone()),
                body,
                push: true,
                data: json!({
                    "order_id": order.id,
                    "total": order.total,
                    "pickup_address": order.pickup_address,
                    "delivery_address": order.delivery_address,
                    "notification_type": notice.kind(),
                }),
            }
        }
        DriverNotice::OnlineBroadcast => DriverMessage {
            title: "New Order Available!",
            body: format!(
                "Order #{short_id} - {total}. Pickup: {}",
                order.pickup_address
            ),
            push: true,
            sms: Some(format!(
                "New order available: {} → {}",
                order.pickup_address, order.delivery_address
            )),
            data: json!({
                "order_id": order.id,
                "total": order.total,
                "pickup_address": order.pickup_address,
                "delivery_address": order.delivery_address,
                "notification_type": notice.kind(),
                "url": "/driver-dashboard",
            }),
        },
        DriverNotice::WaitingBroadcast => DriverMessage {
            title: "New Order Available!",
            body: format!(
                "Order #{short_id} is waiting for a driver. Pickup: {}. Total: {total}",
                order.pickup_address
            ),
            push: false,
            sms: None,
            data: json!({
                "order_id": order.id,
                "total": order.total,
                "pickup_address": order.pickup_address,
                "delivery_address": order.delivery_address,
                "notification_type": notice.kind(),
                "is_broadcast": true,
            }),
        },
    }
}

/// Notifies one driver about an order.
///
/// The in-app row is always written. The returned error only reports that the
/// push could not be handed to the relay; SMS failures are logged.
pub fn notify_driver(
    state: &AppState,
    driver: &DriverProfile,
    order: &Order,
    notice: DriverNotice,
) -> Result<(), AppError> {
    let message = driver_message(order, notice);

    store_notification(
        state,
        Recipient::Driver(driver.id),
        notice.kind(),
        message.title,
        message.body.clone(),
        message.data.clone(),
        AlertPriority::Normal,
    );

    if let (Some(phone), Some(sms)) = (driver.phone.as_deref(), message.sms) {
        send_sms(state, phone, sms);
    }

    if message.push {
        emit(
            state,
            OutboundMessage::Push {
                user_id: driver.id,
                title: message.title.to_string(),
                body: message.body,
                data: message.data,
            },
        )?;
    }

    debug!(driver_id = %driver.id, order_id = %order.id, kind = notice.kind(), "driver notified");
    Ok(())
}

pub fn notify_customer(state: &AppState, order: &Order, notice: CustomerNotice) {
    let Some(customer) = state
        .customers
        .get(&order.customer_id)
        .map(|entry| entry.value().clone())
    else {
        warn!(order_id = %order.id, customer_id = %order.customer_id, "customer profile not found");
        return;
    };

    let short_id = order.short_id();
    let (title, body) = match notice {
        CustomerNotice::OrderCreated => (
            "Order Confirmed!",
            format!("Your order #{short_id} has been confirmed. We're finding a driver for you!"),
        ),
        CustomerNotice::DriverAssigned => (
            "Driver Assigned!",
            format!("Your order #{short_id} has been assigned to a driver."),
        ),
        CustomerNotice::StatusChanged => (
            "Order Update",
            format!("Your order #{short_id} status has been updated."),
        ),
    };

    store_notification(
        state,
        Recipient::Customer(customer.id),
        notice.kind(),
        title,
        body.clone(),
        json!({
            "order_id": order.id,
            "status": order.status,
            "type": notice.kind(),
            "driver_id": order.driver_id,
            "pickup_address": order.pickup_address,
            "delivery_address": order.delivery_address,
            "total": order.total,
        }),
        AlertPriority::Normal,
    );

    if let Some(phone) = customer.phone.as_deref() {
        send_sms(state, phone, format!("{title}\n{body}"));
    }

    if let Some(email) = customer.email.as_deref() {
        let html = format!(
            "<h2>{title}</h2>\n<p>{body}</p>\n<p><strong>Order Details:</strong></p>\n<ul>\n\
             <li>Order ID: #{short_id}</li>\n<li>Pickup: {pickup}</li>\n\
             <li>Delivery: {delivery}</li>\n<li>Total: {total}</li>\n</ul>\n\
             <p><a href=\"{app_url}/my-orders\">View your order</a></p>",
            pickup = order.pickup_address,
            delivery = order.delivery_address,
            total = format_money(order.total),
            app_url = state.settings.app_url.trim_end_matches('/'),
        );
        let message = OutboundMessage::email(email, title, html, Some(format!("{title}\n\n{body}")));
        if let Err(err) = emit(state, message) {
            warn!(order_id = %order.id, error = %err, "customer email not queued");
        }
    }
}

pub fn raise_admin_alert(state: &AppState, alert: AdminAlert, order: &Order, detail: Option<&str>) {
    let short_id = order.short_id();
    let (title, message, priority) = match alert {
        AdminAlert::NoDriversAvailable => (
            "No Drivers Available",
            format!("Order #{short_id} needs a driver. Pickup: {}", order.pickup_address),
            AlertPriority::High,
        ),
        AdminAlert::DispatchFailed => (
            "Dispatch Failed",
            format!(
                "Order #{short_id} could not be dispatched: {}",
                detail.unwrap_or("unknown error")
            ),
            AlertPriority::High,
        ),
        AdminAlert::QueueExhausted => (
            "Order Still Unassigned",
            format!("Order #{short_id} exhausted its notification retries"),
            AlertPriority::High,
        ),
    };

    warn!(order_id = %order.id, alert = alert.kind(), "admin alert raised");

    store_notification(
        state,
        Recipient::Admin,
        alert.kind(),
        title,
        message,
        json!({
            "order_id": order.id,
            "customer_id": order.customer_id,
            "pickup_address": order.pickup_address,
            "delivery_address": order.delivery_address,
            "total": order.total,
        }),
        priority,
    );
}

fn store_notification(
    state: &AppState,
    recipient: Recipient,
    kind: &str,
    title: &str,
    body: String,
    data: Value,
    priority: AlertPriority,
) -> Notification {
    let notification = Notification {
        id: Uuid::new_v4(),
        recipient,
        kind: kind.to_string(),
        title: title.to_string(),
        body,
        data,
        priority,
        status: NotificationStatus::Unread,
        created_at: Utc::now(),
    };

    state
        .notifications
        .insert(notification.id, notification.clone());
    state
        .metrics
        .notifications_total
        .with_label_values(&["in_app", "stored"])
        .inc();
    state.publish(DispatchEvent::Notification(notification.clone()));

    notification
}

fn send_sms(state: &AppState, phone: &str, body: String) {
    let Some(to) = normalize_phone(phone) else {
        warn!(phone, "skipping sms to unusable phone number");
        return;
    };

    if let Err(err) = emit(state, OutboundMessage::Sms { to, body }) {
        warn!(error = %err, "sms not queued");
    }
}

fn emit(state: &AppState, message: OutboundMessage) -> Result<(), AppError> {
    let channel = message.channel();
    match state.outbound_tx.try_send(message) {
        Ok(()) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&[channel, "queued"])
                .inc();
            Ok(())
        }
        Err(err) => {
            state
                .metrics
                .notifications_total
                .with_label_values(&[channel, "dropped"])
                .inc();
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "relay buffer full",
                mpsc::error::TrySendError::Closed(_) => "relay closed",
            };
            Err(AppError::Internal(format!("{channel} delivery failed: {reason}")))
        }
    }
}

pub fn recipient_notifications(state: &AppState, recipient: Recipient) -> Vec<Notification> {
    let mut notifications: Vec<Notification> = state
        .notifications
        .iter()
        .filter(|entry| entry.recipient == recipient)
        .map(|entry| entry.value().clone())
        .collect();
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    notifications
}

pub fn mark_read(state: &AppState, notification_id: Uuid) -> Result<Notification, AppError> {
    let mut notification = state
        .notifications
        .get_mut(&notification_id)
        .ok_or_else(|| AppError::NotFound(format!("notification {notification_id} not found")))?;

    notification.status = NotificationStatus::Read;
    Ok(notification.clone())
}

/// Keeps digits and `+`; numbers without a country code are assumed to be US.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let cleaned: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if cleaned.starts_with('+') {
        let digits = &cleaned[1..];
        if digits.is_empty() || digits.contains('+') {
            return None;
        }
        return Some(cleaned);
    }

    let digits: String = cleaned.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(format!("+1{digits}"))
    }
}

pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    text
}

fn format_money(amount: f64) -> String {
    format!("${amount:.2}")
}

/// Drains outbound messages. Provider clients hook in here; until then each
/// delivery is logged.
pub async fn run_notification_relay(mut outbound_rx: mpsc::Receiver<OutboundMessage>) {
    info!("notification relay started");

    while let Some(message) = outbound_rx.recv().await {
        match &message {
            OutboundMessage::Push { user_id, title, .. } => {
                info!(channel = "push", user_id = %user_id, title = %title, "outbound notification relayed");
            }
            OutboundMessage::Sms { to, .. } => {
                info!(channel = "sms", to = %to, "outbound notification relayed");
            }
            OutboundMessage::Email { to, subject, .. } => {
                info!(channel = "email", to = %to, subject = %subject, "outbound notification relayed");
            }
        }
    }

    warn!("notification relay stopped: outbound channel closed");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::{mark_read, normalize_phone, recipient_notifications, strip_tags, OutboundMessage};
    use crate::config::DispatchSettings;
    use crate::error::AppError;
    use crate::models::notification::{
        AlertPriority, Notification, NotificationStatus, Recipient,
    };
    use crate::state::AppState;

    #[test]
    fn phone_without_country_code_gets_us_prefix() {
        assert_eq!(normalize_phone("(555) 123-4567").as_deref(), Some("+15551234567"));
    }

    #[test]
    fn phone_with_country_code_is_kept() {
        assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
    }

    #[test]
    fn phone_without_digits_is_rejected() {
        assert_eq!(normalize_phone("n/a"), None);
        assert_eq!(normalize_phone("+"), None);
    }

    #[test]
    fn email_text_falls_back_to_stripped_html() {
        let message = OutboundMessage::email(
            "a@example.com",
            "Hi",
            "<h2>Hello</h2><p>world</p>".to_string(),
            None,
        );
        match message {
            OutboundMessage::Email { text, .. } => assert_eq!(text, "Helloworld"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn strip_tags_keeps_plain_text() {
        assert_eq!(strip_tags("a > b"), "a > b");
    }

    #[test]
    fn mark_read_flips_status_once_stored() {
        let (state, _channels) = AppState::new(DispatchSettings::default(), 4, 4, 4);
        let customer_id = Uuid::new_v4();
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient: Recipient::Customer(customer_id),
            kind: "status_changed".to_string(),
            title: "Order Update".to_string(),
            body: "Your order is on its way".to_string(),
            data: json!({}),
            priority: AlertPriority::Normal,
            status: NotificationStatus::Unread,
            created_at: Utc::now(),
        };
        state.notifications.insert(notification.id, notification.clone());

        let read = mark_read(&state, notification.id).unwrap();
        assert_eq!(read.status, NotificationStatus::Read);

        let inbox = recipient_notifications(&state, Recipient::Customer(customer_id));
        assert_eq!(inbox[0].status, NotificationStatus::Read);

        assert!(matches!(
            mark_read(&state, Uuid::new_v4()),
            Err(AppError::NotFound(_))
        ));
    }
}
