//! reqwest-backed webhook client.

use std::error::Error as StdError;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use tracing::{debug, warn};

use super::{DeliveryClient, DeliveryOutcome};
use crate::{Error, Result};

/// Longest response body excerpt kept in debug logs.
const MAX_LOGGED_BODY_CHARS: usize = 512;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate got there first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[derive(Debug, Clone)]
pub struct WebhookClientConfig {
    pub connect_timeout: Duration,
    /// Whole-request deadline, including reading the response.
    pub timeout: Duration,
    pub user_agent: String,
}

impl WebhookClientConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: timeout.min(Duration::from_secs(10)),
            timeout,
            ..Self::default()
        }
    }
}

impl Default for WebhookClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            user_agent: concat!("notify-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Webhook delivery over HTTP(S).
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    pub fn new(config: &WebhookClientConfig) -> Result<Self> {
        install_rustls_provider();

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.timeout)
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            // A 3xx is a delivery failure, not something to follow.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Http(format!("Failed to build webhook client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryClient for WebhookClient {
    async fn send(&self, payload: &str, url: &str) -> DeliveryOutcome {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload.to_owned())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let message = error_chain(&e);
                warn!(destination = %url, error = %message, "Webhook request failed");
                return DeliveryOutcome::TransportError(message);
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(destination = %url, status = status.as_u16(), "Webhook delivered");
            return DeliveryOutcome::Success;
        }

        let body = response.text().await.unwrap_or_default();
        warn!(destination = %url, status = status.as_u16(), "Webhook rejected notification");
        debug!(
            destination = %url,
            body = %truncate_chars(&body, MAX_LOGGED_BODY_CHARS),
            "Webhook error response"
        );
        DeliveryOutcome::HttpFailure {
            status: status.as_u16(),
        }
    }
}

/// `err` followed by each of its sources, separated by `": "`.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 2), "he");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = Error::Io(inner);
        assert_eq!(error_chain(&outer), "IO error: refused");
    }

    #[test]
    fn test_config_with_timeout() {
        let config = WebhookClientConfig::with_timeout(Duration::from_secs(3));
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert!(config.user_agent.starts_with("notify-relay/"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            WebhookClient::new(&WebhookClientConfig::with_timeout(Duration::from_secs(5))).unwrap();
        let outcome = client.send("{}", &format!("http://{addr}/hook")).await;
        assert!(matches!(outcome, DeliveryOutcome::TransportError(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_error() {
        let client = WebhookClient::new(&WebhookClientConfig::default()).unwrap();
        let outcome = client.send("{}", "not a url").await;
        assert!(matches!(outcome, DeliveryOutcome::TransportError(_)));
    }
}
