//! Notification event and its JSON wire payload.

use serde::{Deserialize, Serialize};

/// One observed device notification.
///
/// The serialized form is the payload POSTed to webhooks and stored
/// verbatim in failed/undecided records. Keys are camelCase in field
/// order; absent optional fields are omitted rather than written as
/// `null`. The platform identifier is written under the key `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Post time in Unix epoch milliseconds.
    pub timestamp: i64,
    #[serde(rename = "id")]
    pub source_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl NotificationEvent {
    pub fn new(package_name: impl Into<String>, timestamp: i64, source_id: i64) -> Self {
        Self {
            package_name: package_name.into(),
            title: None,
            text: None,
            timestamp,
            source_id,
            tag: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Title as seen by the filter engine (`""` when absent).
    pub fn title_or_empty(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Text as seen by the filter engine (`""` when absent).
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Serialize to the JSON payload sent to webhooks.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a stored payload back into an event.
    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let event = NotificationEvent::new("com.slack", 1_700_000_000_123, 42)
            .with_title("general")
            .with_text("hello");

        assert_eq!(
            event.to_payload().unwrap(),
            r#"{"packageName":"com.slack","title":"general","text":"hello","timestamp":1700000000123,"id":42}"#
        );
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let event = NotificationEvent::new("com.unknown.app", 5, 1);
        let payload = event.to_payload().unwrap();

        assert!(!payload.contains("title"));
        assert!(!payload.contains("null"));
        assert_eq!(event.title_or_empty(), "");
        assert_eq!(event.text_or_empty(), "");
    }

    #[test]
    fn test_from_payload_tolerates_nulls() {
        let event = NotificationEvent::from_payload(
            r#"{"packageName":"a.b","title":null,"text":"t","timestamp":1,"id":2,"tag":null}"#,
        )
        .unwrap();

        assert_eq!(event.package_name, "a.b");
        assert_eq!(event.title, None);
        assert_eq!(event.text.as_deref(), Some("t"));
        assert_eq!(event.source_id, 2);
    }
}
