use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::routing::post;
use notification_rules::{
    Destination, FilterEngine, IgnoreList, MatchRule, NotificationEvent, Pattern, RuleConfig,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

use notify_relay::database::Database;
use notify_relay::delivery::{DeliveryClient, DeliveryOutcome, WebhookClient, WebhookClientConfig};
use notify_relay::pipeline::{NotificationPipeline, ProcessingResult};
use notify_relay::store::{NotificationStore, RecordKind};

#[derive(Debug, Clone)]
struct Received {
    hook: String,
    content_type: Option<String>,
    body: String,
}

struct Receiver {
    status: AtomicU16,
    received: Mutex<Vec<Received>>,
}

impl Receiver {
    fn set_status(&self, status: StatusCode) {
        self.status.store(status.as_u16(), Ordering::SeqCst);
    }

    fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn hook(
    State(receiver): State<Arc<Receiver>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    receiver.received.lock().unwrap().push(Received {
        hook: name,
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    StatusCode::from_u16(receiver.status.load(Ordering::SeqCst)).unwrap()
}

/// Receiver on an ephemeral local port answering with `status`.
async fn spawn_receiver(status: StatusCode) -> (SocketAddr, Arc<Receiver>) {
    let receiver = Arc::new(Receiver {
        status: AtomicU16::new(status.as_u16()),
        received: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/hooks/{name}", post(hook))
        .with_state(receiver.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, receiver)
}

fn client() -> WebhookClient {
    WebhookClient::new(&WebhookClientConfig::with_timeout(std::time::Duration::from_secs(5))).unwrap()
}

fn event() -> NotificationEvent {
    NotificationEvent::new("com.slack", 1_700_000_000_000, 42)
        .with_title("general")
        .with_text("deploy finished")
}

#[tokio::test]
async fn test_send_posts_json_payload() {
    let (addr, receiver) = spawn_receiver(StatusCode::OK).await;
    let payload = event().to_payload().unwrap();

    let outcome = client()
        .send(&payload, &format!("http://{addr}/hooks/slack"))
        .await;

    assert_eq!(outcome, DeliveryOutcome::Success);
    let received = receiver.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].hook, "slack");
    assert_eq!(received[0].content_type.as_deref(), Some("application/json"));
    assert_eq!(received[0].body, payload);
}

#[tokio::test]
async fn test_send_reports_http_status() {
    let (addr, _receiver) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;

    let outcome = client()
        .send("{}", &format!("http://{addr}/hooks/slack"))
        .await;

    assert_eq!(outcome, DeliveryOutcome::HttpFailure { status: 500 });
    assert_eq!(outcome.error_detail().as_deref(), Some("HTTP 500"));
}

#[tokio::test]
async fn test_not_modified_is_not_success() {
    let (addr, _receiver) = spawn_receiver(StatusCode::NOT_MODIFIED).await;

    let outcome = client()
        .send("{}", &format!("http://{addr}/hooks/slack"))
        .await;

    assert_eq!(outcome, DeliveryOutcome::HttpFailure { status: 304 });
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let receiver = Arc::new(Receiver {
        status: AtomicU16::new(StatusCode::OK.as_u16()),
        received: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/moved", post(|| async { Redirect::temporary("/hooks/target") }))
        .route("/hooks/{name}", post(hook))
        .with_state(receiver.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let outcome = client()
        .send("{}", &format!("http://{addr}/moved"))
        .await;

    assert_eq!(outcome, DeliveryOutcome::HttpFailure { status: 307 });
    assert!(receiver.received().is_empty());
}

struct Harness {
    _dir: TempDir,
    db: Database,
    pipeline: NotificationPipeline,
    store: NotificationStore,
}

async fn harness(addr: SocketAddr) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display());
    let db = Database::connect(&url).await.unwrap();
    let store = NotificationStore::from_database(&db);

    let config = RuleConfig::new(
        vec![
            Destination::new(
                format!("http://{addr}/hooks/chat"),
                "Chat",
                vec![MatchRule::package(Pattern::literal("com.slack"))],
            ),
            Destination::new(
                format!("http://{addr}/hooks/audit"),
                "Audit",
                vec![MatchRule::any().with_title(Pattern::regex(".*general.*").unwrap())],
            ),
        ],
        IgnoreList::new(vec![Pattern::literal("com.android.systemui")]),
    )
    .unwrap();

    let pipeline = NotificationPipeline::new(
        Arc::new(FilterEngine::new(config)),
        Arc::new(client()),
        store.clone(),
    );
    Harness {
        _dir: dir,
        db,
        pipeline,
        store,
    }
}

#[tokio::test]
async fn test_failed_deliveries_are_retried_verbatim() {
    let (addr, receiver) = spawn_receiver(StatusCode::SERVICE_UNAVAILABLE).await;
    let h = harness(addr).await;
    let event = event();

    assert_eq!(h.pipeline.process(&event).await, ProcessingResult::FailedToSend);

    let failed = h.store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 2);
    for record in &failed {
        assert_eq!(record.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(record.payload, event.to_payload().unwrap());
    }

    receiver.set_status(StatusCode::OK);
    assert!(h.pipeline.retry_all_failed().await);
    assert_eq!(h.store.count(RecordKind::Failed).await.unwrap(), 0);

    // Two attempts per destination, byte-identical each time.
    let received = receiver.received();
    assert_eq!(received.len(), 4);
    assert!(received.iter().all(|r| r.body == received[0].body));
    let mut hooks: Vec<&str> = received.iter().map(|r| r.hook.as_str()).collect();
    hooks.sort();
    assert_eq!(hooks, ["audit", "audit", "chat", "chat"]);

    h.db.close().await;
}

#[tokio::test]
async fn test_unreachable_destination_is_recorded() {
    let (addr, receiver) = spawn_receiver(StatusCode::OK).await;
    let h = harness(addr).await;

    // Only the audit destination matches; the chat hook is never hit.
    let event = NotificationEvent::new("org.example.mail", 1, 7).with_title("general meeting");
    assert_eq!(h.pipeline.process(&event).await, ProcessingResult::Sent);
    assert_eq!(receiver.received()[0].hook, "audit");

    // Same rules, nothing listening.
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let broken = harness(closed).await;
    let result = broken.pipeline.process(&event).await;
    assert_eq!(result, ProcessingResult::FailedToSend);

    let failed = broken.store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].destination_name, "Audit");
    assert!(failed[0].last_error.is_some());
    assert_eq!(broken.store.count(RecordKind::Undecided).await.unwrap(), 0);

    h.db.close().await;
    broken.db.close().await;
}

#[tokio::test]
async fn test_undecided_upload_and_ignore() {
    let (addr, receiver) = spawn_receiver(StatusCode::OK).await;
    let h = harness(addr).await;

    let ignored = NotificationEvent::new("com.android.systemui", 1, 1).with_title("general");
    assert_eq!(h.pipeline.process(&ignored).await, ProcessingResult::Ignored);
    assert!(receiver.received().is_empty());

    let unmatched = NotificationEvent::new("org.example.unknown", 2, 2).with_title("lunch");
    assert_eq!(
        h.pipeline.process(&unmatched).await,
        ProcessingResult::NoMatchingRules
    );

    let undecided = h.store.list_undecided().await.unwrap();
    assert_eq!(undecided.len(), 1);
    assert_eq!(undecided[0].reason, "NO_MATCH");

    let uploaded = h
        .pipeline
        .upload_undecided_by_id(undecided[0].id, &format!("http://{addr}/hooks/triage"))
        .await
        .unwrap();
    assert!(uploaded);
    assert_eq!(h.store.count(RecordKind::Undecided).await.unwrap(), 0);

    let received = receiver.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].hook, "triage");
    assert_eq!(received[0].body, unmatched.to_payload().unwrap());

    h.db.close().await;
}
