//! Integration tests for the request lifecycle on the local store.
//!
//! Covers the state machine end to end: registration, operation association,
//! cancellation with the hook, normal completion and expiry.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cancelkit_core::{
    Backend, Entry, EntryStore, RegistryConfig, RegistryError, RequestStatus, StoreError,
    Transition,
};
use cancelkit_runtime::stores::LocalEntryStore;
use cancelkit_runtime::{CancellationOutcome, CancellationRegistry, ConfiguredRegistry};
use cancelkit_testing::{
    HookBehavior, PanickingObserver, RecordingHook, RecordingObserver, UnavailableStore,
    init_tracing, test_clock,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const TTL: Duration = Duration::from_secs(600);

type TestRegistry =
    CancellationRegistry<Value, LocalEntryStore<Value>, RecordingHook<Value>, RecordingObserver>;

fn registry_with(behavior: HookBehavior) -> (TestRegistry, RecordingHook<Value>, RecordingObserver) {
    init_tracing();
    let hook = RecordingHook::new(behavior);
    let observer = RecordingObserver::new();
    let registry = CancellationRegistry::new(LocalEntryStore::new(), hook.clone(), TTL)
        .with_observer(observer.clone())
        .with_clock(Arc::new(test_clock()));
    (registry, hook, observer)
}

/// Local store on which every compare-and-swap loses to another writer.
struct ContendedStore(LocalEntryStore<Value>);

impl EntryStore<Value> for ContendedStore {
    async fn insert(
        &self,
        request_id: &str,
        entry: Entry<Value>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.0.insert(request_id, entry, ttl).await
    }

    async fn load(&self, request_id: &str) -> Result<Option<Entry<Value>>, StoreError> {
        self.0.load(request_id).await
    }

    async fn compare_and_swap(
        &self,
        _request_id: &str,
        _current: &Entry<Value>,
        _next: Entry<Value>,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn remove(&self, request_id: &str) -> Result<bool, StoreError> {
        self.0.remove(request_id).await
    }
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_disconnect_cancels_associated_operation() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.associate_operation("r1", json!({"pid": 42})).await.unwrap();
    let outcome = registry.mark_for_cancellation("r1").await;

    assert_eq!(outcome, CancellationOutcome::HookCompleted { success: true });
    assert_eq!(hook.calls(), vec![("r1".to_string(), json!({"pid": 42}))]);
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_cancellation_without_operation_skips_hook() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    let outcome = registry.mark_for_cancellation("r1").await;

    assert_eq!(outcome, CancellationOutcome::NoOperation);
    assert_eq!(hook.call_count(), 0);
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_repeated_cancellation_invokes_hook_once() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.associate_operation("r1", json!(7)).await.unwrap();

    let first = registry.mark_for_cancellation("r1").await;
    let second = registry.mark_for_cancellation("r1").await;

    assert!(first.invoked_hook());
    assert_eq!(second, CancellationOutcome::Skipped);
    assert_eq!(hook.call_count(), 1);
}

#[tokio::test]
async fn test_concurrent_cancellation_invokes_hook_once() {
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed)
        .with_delay(Duration::from_millis(50));
    let registry = Arc::new(CancellationRegistry::new(
        LocalEntryStore::new(),
        hook.clone(),
        TTL,
    ));

    registry.register("r1").await;
    registry.associate_operation("r1", json!(7)).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.mark_for_cancellation("r1").await })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.invoked_hook()).count(), 1);
    assert_eq!(hook.call_count(), 1);
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_status_is_cancelling_while_hook_runs() {
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed)
        .with_delay(Duration::from_millis(100));
    let registry = Arc::new(CancellationRegistry::new(
        LocalEntryStore::new(),
        hook.clone(),
        TTL,
    ));

    registry.register("r1").await;
    registry.associate_operation("r1", json!(7)).await.unwrap();

    let cancelling = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.mark_for_cancellation("r1").await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelling);

    cancelling.await.unwrap();
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_failed_hook_still_cancels() {
    for behavior in [
        HookBehavior::Decline,
        HookBehavior::Fail("backend unreachable".to_string()),
        HookBehavior::Panic,
    ] {
        let (registry, hook, observer) = registry_with(behavior.clone());

        registry.register("r1").await;
        registry.associate_operation("r1", json!(7)).await.unwrap();
        let outcome = registry.mark_for_cancellation("r1").await;

        let expected = if behavior == HookBehavior::Decline {
            CancellationOutcome::HookCompleted { success: false }
        } else {
            CancellationOutcome::HookFailed
        };
        assert_eq!(outcome, expected, "behavior {behavior:?}");
        assert_eq!(hook.call_count(), 1);
        assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);

        let hook_event = observer
            .transitions("r1")
            .into_iter()
            .find(|t| matches!(t, Transition::HookInvoked { .. }))
            .unwrap();
        assert!(matches!(hook_event, Transition::HookInvoked { success: false, .. }));
    }
}

#[tokio::test]
async fn test_cancellation_of_unknown_request_is_noop() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    let outcome = registry.mark_for_cancellation("ghost").await;

    assert_eq!(outcome, CancellationOutcome::Skipped);
    assert_eq!(hook.call_count(), 0);
    assert_eq!(registry.get_status("ghost").await, RequestStatus::Finished);
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test]
async fn test_finished_request_never_invokes_hook() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r2").await;
    registry.associate_operation("r2", json!({"pid": 7})).await.unwrap();
    registry.mark_as_finished("r2").await;

    assert_eq!(registry.get_status("r2").await, RequestStatus::Finished);
    assert_eq!(registry.mark_for_cancellation("r2").await, CancellationOutcome::Skipped);
    assert_eq!(hook.call_count(), 0);
}

#[tokio::test]
async fn test_mark_as_finished_is_idempotent() {
    let (registry, _, observer) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.mark_as_finished("r1").await;
    registry.mark_as_finished("r1").await;
    registry.mark_as_finished("never-registered").await;

    assert_eq!(registry.get_status("r1").await, RequestStatus::Finished);
    assert_eq!(observer.transition_names("r1"), vec!["registered", "completed"]);
    assert!(observer.transitions("never-registered").is_empty());
}

#[tokio::test]
async fn test_finishing_a_cancelled_request_removes_it() {
    let (registry, _, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.mark_for_cancellation("r1").await;
    registry.mark_as_finished("r1").await;

    assert_eq!(registry.get_status("r1").await, RequestStatus::Finished);
    assert!(registry.store().is_empty());
}

// ============================================================================
// Registration and association
// ============================================================================

#[tokio::test]
async fn test_unregistered_request_reports_finished() {
    let (registry, _, _) = registry_with(HookBehavior::Succeed);

    assert_eq!(registry.get_status("nobody").await, RequestStatus::Finished);
}

#[tokio::test]
async fn test_associate_with_missing_request_is_not_found() {
    let (registry, _, _) = registry_with(HookBehavior::Succeed);

    let err = registry
        .associate_operation("missing", json!(1))
        .await
        .unwrap_err();

    assert_eq!(err, RegistryError::not_found("missing"));
}

#[tokio::test]
async fn test_associate_after_cancellation_is_not_found() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.mark_for_cancellation("r1").await;
    let result = registry.associate_operation("r1", json!(1)).await;

    assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    assert_eq!(hook.call_count(), 0);
}

#[tokio::test]
async fn test_latest_association_wins() {
    let (registry, hook, _) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.associate_operation("r1", json!(1)).await.unwrap();
    registry.associate_operation("r1", json!(2)).await.unwrap();
    registry.mark_for_cancellation("r1").await;

    assert_eq!(hook.calls(), vec![("r1".to_string(), json!(2))]);
}

#[tokio::test]
async fn test_register_twice_keeps_existing_entry() {
    let (registry, hook, observer) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.associate_operation("r1", json!(5)).await.unwrap();
    registry.register("r1").await;
    registry.mark_for_cancellation("r1").await;

    assert_eq!(hook.calls(), vec![("r1".to_string(), json!(5))]);
    assert_eq!(
        observer.transition_names("r1").iter().filter(|n| **n == "registered").count(),
        1
    );
}

#[tokio::test]
async fn test_register_reports_whether_it_created_the_entry() {
    let (registry, _, _) = registry_with(HookBehavior::Succeed);

    assert!(registry.register("r1").await);
    assert!(!registry.register("r1").await);

    registry.mark_as_finished("r1").await;
    assert!(registry.register("r1").await);
}

#[tokio::test]
async fn test_register_on_unavailable_store_reports_not_created() {
    let registry = CancellationRegistry::new(
        UnavailableStore,
        RecordingHook::<Value>::new(HookBehavior::Succeed),
        TTL,
    );

    assert!(!registry.register("r1").await);
}

#[tokio::test]
async fn test_associate_under_endless_contention_is_reported() {
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed);
    let registry = CancellationRegistry::new(
        ContendedStore(LocalEntryStore::new()),
        hook.clone(),
        TTL,
    );

    registry.register("r1").await;
    let result = registry.associate_operation("r1", json!(1)).await;

    assert_eq!(
        result,
        Err(RegistryError::Contended {
            request_id: "r1".to_string()
        })
    );
    assert_eq!(registry.get_status("r1").await, RequestStatus::Active);
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_expired_request_reports_finished() {
    init_tracing();
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed);
    let registry = CancellationRegistry::new(
        LocalEntryStore::new(),
        hook.clone(),
        Duration::from_millis(10),
    );

    registry.register("r3").await;
    assert_eq!(registry.get_status("r3").await, RequestStatus::Active);

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(registry.get_status("r3").await, RequestStatus::Finished);
    assert_eq!(registry.mark_for_cancellation("r3").await, CancellationOutcome::Skipped);
    assert_eq!(hook.call_count(), 0);
}

#[tokio::test]
async fn test_association_refreshes_expiry() {
    let registry = CancellationRegistry::new(
        LocalEntryStore::new(),
        RecordingHook::<Value>::new(HookBehavior::Succeed),
        Duration::from_millis(150),
    );

    registry.register("r1").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.associate_operation("r1", json!(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(registry.get_status("r1").await, RequestStatus::Active);
}

// ============================================================================
// Observers and failure containment
// ============================================================================

#[tokio::test]
async fn test_observer_sees_full_cancellation_lifecycle() {
    let (registry, _, observer) = registry_with(HookBehavior::Succeed);

    registry.register("r1").await;
    registry.associate_operation("r1", json!(1)).await.unwrap();
    registry.mark_for_cancellation("r1").await;
    registry.mark_as_finished("r1").await;

    assert_eq!(
        observer.transition_names("r1"),
        vec![
            "registered",
            "operation_associated",
            "disconnect_detected",
            "hook_invoked",
            "completed",
        ]
    );

    let events = observer.events();
    assert!(events.iter().all(|e| e.timestamp == test_clock_time()));
    let disconnect = events
        .iter()
        .find(|e| e.transition == Transition::DisconnectDetected)
        .unwrap();
    assert_eq!(disconnect.metadata.get("status").map(String::as_str), Some("active"));
}

fn test_clock_time() -> cancelkit_core::DateTime<cancelkit_core::Utc> {
    use cancelkit_core::environment::Clock;
    test_clock().now()
}

#[tokio::test]
async fn test_panicking_observer_does_not_break_requests() {
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed);
    let registry = CancellationRegistry::new(LocalEntryStore::new(), hook.clone(), TTL)
        .with_observer(PanickingObserver);

    registry.register("r1").await;
    registry.associate_operation("r1", json!(1)).await.unwrap();
    let outcome = registry.mark_for_cancellation("r1").await;

    assert!(outcome.invoked_hook());
    assert_eq!(registry.get_status("r1").await, RequestStatus::Cancelled);
}

#[tokio::test]
async fn test_unavailable_store_degrades_gracefully() {
    init_tracing();
    let hook = RecordingHook::<Value>::new(HookBehavior::Succeed);
    let registry = CancellationRegistry::new(UnavailableStore, hook.clone(), TTL);

    registry.register("r1").await;
    assert!(registry.associate_operation("r1", json!(1)).await.is_ok());
    assert_eq!(registry.mark_for_cancellation("r1").await, CancellationOutcome::Skipped);
    registry.mark_as_finished("r1").await;

    assert_eq!(registry.get_status("r1").await, RequestStatus::Finished);
    assert_eq!(hook.call_count(), 0);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_registry_from_default_config_uses_local_store() {
    let config = RegistryConfig::default().with_ttl(Duration::from_secs(5));
    let registry: ConfiguredRegistry<Value, _> =
        ConfiguredRegistry::from_config(
            &config,
            None,
            RecordingHook::<Value>::new(HookBehavior::Succeed),
        )
        .unwrap();

    assert_eq!(registry.store().backend(), Backend::Local);
    assert_eq!(registry.ttl(), Duration::from_secs(5));

    registry.register("r1").await;
    assert_eq!(registry.get_status("r1").await, RequestStatus::Active);
}

#[test]
fn test_distributed_config_without_client_is_rejected() {
    let config = RegistryConfig::new(Backend::Distributed);
    let result: Result<ConfiguredRegistry<Value, _>, _> = ConfiguredRegistry::from_config(
        &config,
        None,
        RecordingHook::<Value>::new(HookBehavior::Succeed),
    );

    assert!(matches!(result, Err(RegistryError::Configuration(_))));
}
