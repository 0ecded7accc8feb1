//! Delivery client: POSTs a serialized notification to one webhook URL.
//!
//! Sending never returns an error. Every failure mode is folded into a
//! [`DeliveryOutcome`] so the pipeline can record it and move on.

mod webhook;

pub use webhook::{WebhookClient, WebhookClientConfig};

use async_trait::async_trait;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint answered with a 2xx status.
    Success,
    /// The endpoint answered with a non-2xx status.
    HttpFailure { status: u16 },
    /// No usable response: connect/TLS/timeout or request building failed.
    TransportError(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short error text stored on failed records.
    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::HttpFailure { status } => Some(format!("HTTP {status}")),
            Self::TransportError(message) => Some(message.clone()),
        }
    }
}

/// Sends payloads to webhook URLs.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// POST `payload` (a JSON document) to `url`.
    async fn send(&self, payload: &str, url: &str) -> DeliveryOutcome;
}
