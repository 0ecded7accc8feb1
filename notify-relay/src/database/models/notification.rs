//! Failed and undecided notification records.

use notification_rules::{Destination, NotificationEvent};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// A notification that matched a destination but could not be delivered.
///
/// Rows are never updated. A successful retry deletes the row; a failed
/// retry leaves it untouched.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct FailedNotificationDbModel {
    /// Assigned by SQLite on insert; `0` until then.
    pub id: i64,
    /// Serialized event, re-sent verbatim on retry.
    pub payload: String,
    pub destination_url: String,
    pub destination_name: String,
    pub package_name: String,
    pub title: Option<String>,
    pub text: Option<String>,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub last_error: Option<String>,
}

impl FailedNotificationDbModel {
    pub fn new(
        event: &NotificationEvent,
        payload: impl Into<String>,
        destination: &Destination,
        last_error: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            payload: payload.into(),
            destination_url: destination.url.clone(),
            destination_name: destination.name.clone(),
            package_name: event.package_name.clone(),
            title: event.title.clone(),
            text: event.text.clone(),
            created_at: now_ms(),
            last_error,
        }
    }

    /// Parse the stored payload back into an event.
    pub fn event(&self) -> serde_json::Result<NotificationEvent> {
        NotificationEvent::from_payload(&self.payload)
    }
}

/// Why a notification ended up undecided.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UndecidedReason {
    /// No destination rule matched.
    NoMatch,
}

/// A notification that matched no destination, kept for manual triage.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UndecidedNotificationDbModel {
    pub id: i64,
    pub payload: String,
    pub package_name: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub created_at: i64,
    /// Stored as text; see [`UndecidedReason`].
    pub reason: String,
}

impl UndecidedNotificationDbModel {
    pub fn new(
        event: &NotificationEvent,
        payload: impl Into<String>,
        reason: UndecidedReason,
    ) -> Self {
        Self {
            id: 0,
            payload: payload.into(),
            package_name: event.package_name.clone(),
            title: event.title.clone(),
            text: event.text.clone(),
            created_at: now_ms(),
            reason: reason.to_string(),
        }
    }

    pub fn reason(&self) -> Option<UndecidedReason> {
        self.reason.parse().ok()
    }

    pub fn event(&self) -> serde_json::Result<NotificationEvent> {
        NotificationEvent::from_payload(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notification_rules::{MatchRule, Pattern};

    fn event() -> NotificationEvent {
        NotificationEvent::new("com.slack", 1_700_000_000_000, 7)
            .with_title("general")
            .with_text("hello")
    }

    #[test]
    fn test_failed_record_copies_event_fields() {
        let event = event();
        let payload = event.to_payload().unwrap();
        let destination = Destination::new(
            "https://hooks.example.com/slack",
            "Slack",
            vec![MatchRule::package(Pattern::literal("com.slack"))],
        );

        let record = FailedNotificationDbModel::new(
            &event,
            payload.clone(),
            &destination,
            Some("HTTP 500".to_string()),
        );

        assert_eq!(record.id, 0);
        assert_eq!(record.payload, payload);
        assert_eq!(record.destination_url, "https://hooks.example.com/slack");
        assert_eq!(record.destination_name, "Slack");
        assert_eq!(record.title.as_deref(), Some("general"));
        assert_eq!(record.event().unwrap(), event);
    }

    #[test]
    fn test_undecided_reason_round_trip() {
        assert_eq!(UndecidedReason::NoMatch.to_string(), "NO_MATCH");
        assert_eq!("NO_MATCH".parse::<UndecidedReason>().unwrap(), UndecidedReason::NoMatch);

        let record = UndecidedNotificationDbModel::new(&event(), "{}", UndecidedReason::NoMatch);
        assert_eq!(record.reason, "NO_MATCH");
        assert_eq!(record.reason(), Some(UndecidedReason::NoMatch));
    }
}
