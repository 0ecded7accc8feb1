//! Webhook receiver for manual end-to-end runs.
//!
//! Run:
//!   cargo run -p notify-relay --example webhook_receiver
//!
//! Then point a rules file at it and feed the relay:
//!   echo '{"packageName":"com.slack","postTime":1700000000000,"id":1,"extras":{"android.title":"hi"}}' \
//!     | notify-relay --rules rules.toml run
//!
//! Set `RECEIVER_FAIL_STATUS=503` to reject everything and fill the
//! failed queue, then restart without it and run `notify-relay retry`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use notification_rules::NotificationEvent;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug)]
struct ReceiverState {
    fail_status: Option<StatusCode>,
    received: AtomicU64,
}

impl ReceiverState {
    fn from_env() -> anyhow::Result<Self> {
        let fail_status = match std::env::var("RECEIVER_FAIL_STATUS") {
            Ok(raw) if !raw.trim().is_empty() => Some(StatusCode::from_u16(raw.trim().parse()?)?),
            _ => None,
        };
        Ok(Self {
            fail_status,
            received: AtomicU64::new(0),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var("RECEIVER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:12333".to_string())
        .parse()?;

    let state = Arc::new(ReceiverState::from_env()?);
    if let Some(status) = state.fail_status {
        warn!(%status, "answering every webhook with a failure");
    }

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/webhook/{hook}", post(webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    info!(%addr, "webhook receiver listening on /webhook/{{hook}}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthz(State(state): State<Arc<ReceiverState>>) -> impl IntoResponse {
    axum::Json(json!({ "received": state.received.load(Ordering::Relaxed) }))
}

async fn webhook(
    State(state): State<Arc<ReceiverState>>,
    Path(hook): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(status) = state.fail_status {
        return (status, "rejected by RECEIVER_FAIL_STATUS").into_response();
    }

    let payload = String::from_utf8_lossy(&body);
    let event = match NotificationEvent::from_payload(&payload) {
        Ok(event) => event,
        Err(err) => {
            warn!(%hook, %err, "body is not a notification payload");
            return (StatusCode::BAD_REQUEST, "invalid payload").into_response();
        }
    };

    let count = state.received.fetch_add(1, Ordering::Relaxed) + 1;
    info!(
        %hook,
        count,
        content_type = ?headers.get("content-type").and_then(|v| v.to_str().ok()),
        package = %event.package_name,
        title = event.title_or_empty(),
        text = event.text_or_empty(),
        "received notification"
    );

    StatusCode::OK.into_response()
}
