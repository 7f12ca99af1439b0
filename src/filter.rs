use crate::domain::{CapturedNotification, NotificationEvent, Timestamp};

/// Package name fragments of the stock phone and SMS apps.
const ALLOWED_SOURCES: &[&str] = &["messaging", "mms", "dialer", "telecom", "phone", "incallui"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayDecision {
    Accept(NotificationEvent),
    Reject,
}

pub fn classify(notification: &CapturedNotification) -> RelayDecision {
    let CapturedNotification {
        source_app,
        title,
        body,
        posted_at,
    } = notification;

    if !is_telephony_app(source_app) {
        return RelayDecision::Reject;
    }

    let (title, body) = match (non_empty(title), non_empty(body)) {
        (Some(t), Some(b)) => (t, b),
        _ => return RelayDecision::Reject,
    };

    RelayDecision::Accept(NotificationEvent {
        source_app: source_app.clone(),
        title: title.to_owned(),
        body: body.to_owned(),
        timestamp: posted_at.unwrap_or_else(Timestamp::now),
    })
}

fn is_telephony_app(source_app: &str) -> bool {
    let source_app = source_app.to_lowercase();
    ALLOWED_SOURCES.iter().any(|s| source_app.contains(s))
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}
