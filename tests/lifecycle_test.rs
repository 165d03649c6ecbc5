use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use mindmap::callback::{CallbackHandler, CallbackPayload};
use mindmap::lifecycle::{GenerationConfig, GenerationController};
use mindmap::service::{GenerationContext, GenerationRequest, GenerationService};
use mindmap::store::{GenerationStatus, InMemoryStore, StatusRecord};
use mindmap::{MindmapError, RequestFailure};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

/// Accepts every request and answers nothing; results must come back
/// through the store.
struct Silent;

#[async_trait::async_trait]
impl GenerationService for Silent {
    async fn request(&self, _: &GenerationRequest) -> Result<Option<Value>, RequestFailure> {
        Ok(None)
    }
}

/// Answers call `n` after `delays[n]` with a one-node graph labelled `call n`.
struct Delayed {
    delays: Vec<Duration>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl GenerationService for Delayed {
    async fn request(&self, _: &GenerationRequest) -> Result<Option<Value>, RequestFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delays[call]).await;
        Ok(Some(json!({ "nodes": [{ "id": "0", "data": { "label": format!("call {call}") } }] })))
    }
}

fn mindmap_data() -> Value {
    json!([
        { "id": "0", "parentId": null, "data": { "label": "A" } },
        { "id": "1", "parentId": "0", "data": { "label": "B" } },
        { "id": "2", "parentId": "0", "data": { "label": "C" } },
    ])
}

fn controller(
    store: &Arc<InMemoryStore>,
    service: impl GenerationService + 'static,
    config: GenerationConfig,
) -> GenerationController {
    GenerationController::new("nb", store.clone(), Arc::new(service), config)
}

fn failed_writes(store: &InMemoryStore) -> usize {
    store
        .history("nb")
        .iter()
        .filter(|r| r.status == GenerationStatus::Failed)
        .count()
}

// =============================================================================
// Timeout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn silence_fails_after_two_minutes_with_one_write_back() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(119)).await;
    assert_eq!(controller.snapshot().status, GenerationStatus::Generating);
    assert_eq!(failed_writes(&store), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snap = controller.snapshot();
    assert_eq!(snap.status, GenerationStatus::Failed);
    assert_eq!(snap.error, Some(MindmapError::GenerationTimedOut { after_secs: 120 }));
    assert_eq!(failed_writes(&store), 1);
    assert_eq!(store.get("nb").unwrap().status, GenerationStatus::Failed);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(failed_writes(&store), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_request_counts_against_the_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let service = Delayed {
        delays: vec![Duration::from_secs(500)],
        calls: AtomicUsize::new(0),
    };
    let controller = controller(&store, service, GenerationConfig::default());

    controller.generate(GenerationContext::default()).unwrap();
    let snap = controller.settled().await;
    assert_eq!(snap.error, Some(MindmapError::GenerationTimedOut { after_secs: 120 }));
    assert_eq!(failed_writes(&store), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_after_timeout_starts_a_fresh_cycle() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());

    controller.generate(GenerationContext::default()).unwrap();
    controller.settled().await;

    let cycle = controller.generate(GenerationContext::default()).unwrap();
    let snap = controller.snapshot();
    assert_eq!(snap.cycle, cycle);
    assert_eq!(snap.status, GenerationStatus::Generating);
    assert_eq!(snap.error, None);
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test(start_paused = true)]
async fn callback_delivery_completes_the_cycle() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());
    let callback = CallbackHandler::new(store.clone());

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let payload = CallbackPayload {
        notebook_id: Some("nb".to_string()),
        status: Some("success".to_string()),
        mindmap_data: Some(mindmap_data()),
        error: None,
    };
    callback.handle(&payload, None).await.unwrap();

    let snap = controller.settled().await;
    assert_eq!(snap.status, GenerationStatus::Completed);
    assert_eq!(snap.graph.unwrap().nodes.len(), 3);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(failed_writes(&store), 0);
}

#[tokio::test(start_paused = true)]
async fn completed_marker_waits_for_its_data() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let later = Utc::now() + chrono::Duration::seconds(60);
    store.push("nb", StatusRecord::new(GenerationStatus::Completed, None, later));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.snapshot().status, GenerationStatus::Generating);

    let data_arrives = later + chrono::Duration::seconds(1);
    store.push(
        "nb",
        StatusRecord::new(GenerationStatus::Completed, Some(mindmap_data()), data_arrives),
    );
    let snap = controller.settled().await;
    assert_eq!(snap.status, GenerationStatus::Completed);
    assert_eq!(snap.observed_at, Some(data_arrives));
}

#[tokio::test(start_paused = true)]
async fn stale_update_is_ignored() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());

    let stale = Utc::now() - chrono::Duration::seconds(60);
    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    store.push(
        "nb",
        StatusRecord::new(GenerationStatus::Completed, Some(mindmap_data()), stale),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.snapshot().status, GenerationStatus::Generating);
    assert_eq!(controller.snapshot().graph, None);
}

#[tokio::test(start_paused = true)]
async fn watchdog_recovers_a_missed_notification() {
    let store = Arc::new(InMemoryStore::new());
    let config = GenerationConfig {
        failure_timeout: Duration::from_secs(900),
        ..GenerationConfig::default()
    };
    let controller = controller(&store, Silent, config);

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Written without notifying subscribers.
    store.seed(
        "nb",
        StatusRecord::new(
            GenerationStatus::Completed,
            Some(mindmap_data()),
            Utc::now() + chrono::Duration::seconds(10),
        ),
    );
    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(controller.snapshot().status, GenerationStatus::Generating);

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(controller.snapshot().status, GenerationStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_picks_up_stored_result() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    store.seed(
        "nb",
        StatusRecord::new(
            GenerationStatus::Completed,
            Some(mindmap_data()),
            Utc::now() + chrono::Duration::seconds(10),
        ),
    );

    let snap = controller.refresh().await;
    assert_eq!(snap.status, GenerationStatus::Completed);
}

// =============================================================================
// Failure and supersession
// =============================================================================

#[tokio::test(start_paused = true)]
async fn remote_failure_is_reported() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store, Silent, GenerationConfig::default());
    let callback = CallbackHandler::new(store.clone());

    controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let payload = CallbackPayload {
        notebook_id: Some("nb".to_string()),
        status: Some("error".to_string()),
        ..CallbackPayload::default()
    };
    callback.handle(&payload, None).await.unwrap();

    let snap = controller.settled().await;
    assert!(matches!(snap.error, Some(MindmapError::GenerationFailedRemote(_))));
    assert_eq!(failed_writes(&store), 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_request_cannot_overwrite_newer_cycle() {
    let store = Arc::new(InMemoryStore::new());
    let service = Delayed {
        delays: vec![Duration::from_secs(30), Duration::from_secs(5)],
        calls: AtomicUsize::new(0),
    };
    let controller = controller(&store, service, GenerationConfig::default());

    let first = controller.generate(GenerationContext::default()).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let second = controller.generate(GenerationContext::default()).unwrap();
    assert!(second > first);

    let snap = controller.settled().await;
    assert_eq!(snap.cycle, second);
    assert_eq!(snap.graph.as_ref().unwrap().nodes[0].label, "call 1");

    tokio::time::sleep(Duration::from_secs(60)).await;
    let snap = controller.snapshot();
    assert_eq!(snap.graph.unwrap().nodes[0].label, "call 1");
    let completed = store
        .history("nb")
        .iter()
        .filter(|r| r.status == GenerationStatus::Completed)
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test(start_paused = true)]
async fn request_failures_keep_their_kind() {
    struct Refuses(RequestFailure);

    #[async_trait::async_trait]
    impl GenerationService for Refuses {
        async fn request(&self, _: &GenerationRequest) -> Result<Option<Value>, RequestFailure> {
            Err(self.0.clone())
        }
    }

    let failures = [
        RequestFailure::NotConfigured("MINDMAP_GENERATION_WEBHOOK_URL".to_string()),
        RequestFailure::EndpointNotFound("https://hooks.local/mindmap".to_string()),
        RequestFailure::Network("connection refused".to_string()),
    ];
    let mut messages = Vec::new();
    for failure in failures {
        let store = Arc::new(InMemoryStore::new());
        let controller = controller(&store, Refuses(failure.clone()), GenerationConfig::default());
        controller.generate(GenerationContext::default()).unwrap();

        let snap = controller.settled().await;
        let err = snap.error.unwrap();
        assert_eq!(err, MindmapError::GenerationRequestFailed(failure));
        assert_eq!(failed_writes(&store), 1);
        messages.push(err.user_message());
    }
    messages.dedup();
    assert_eq!(messages.len(), 3);
}
