//! Raw notification decoding.

use std::collections::HashMap;

use notification_rules::NotificationEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Extras key holding the notification title.
pub const EXTRA_TITLE: &str = "android.title";
/// Extras key holding the notification body text.
pub const EXTRA_TEXT: &str = "android.text";

/// A notification as posted by the platform observation hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    pub package_name: String,
    /// Epoch milliseconds.
    pub post_time: i64,
    pub id: i64,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl RawNotification {
    pub fn new(package_name: impl Into<String>, post_time: i64, id: i64) -> Self {
        Self {
            package_name: package_name.into(),
            post_time,
            id,
            tag: None,
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Text form of an extra. Non-string scalars are rendered; `null` and
    /// missing keys are `None`.
    pub fn extra_text(&self, key: &str) -> Option<String> {
        match self.extras.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Build the event the pipeline works on.
pub fn extract_notification(raw: &RawNotification) -> Result<NotificationEvent> {
    if raw.package_name.trim().is_empty() {
        return Err(Error::validation("notification has an empty package name"));
    }

    Ok(NotificationEvent {
        package_name: raw.package_name.clone(),
        title: raw.extra_text(EXTRA_TITLE),
        text: raw.extra_text(EXTRA_TEXT),
        timestamp: raw.post_time,
        source_id: raw.id,
        tag: raw.tag.clone(),
    })
}
