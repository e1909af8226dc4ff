//! Queue draining, retry, and mutex integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence::testing::{FailingHandler, MemoryAuditSink, RecordingHandler};
use cadence::{
    AuditSink, CredentialMinter, ExecutionContext, Handler, HandlerError, HandlerLoader,
    HandlerRef, HandlerResolver, InMemoryRegistry, ItemStatus, ProcessOutcome, Queue, QueueItem,
    QueueProcessor, Registry, StaticLoader, SystemMinter,
};
use serde_json::{json, Value};

use crate::common::{init_tracing, wait_for_item_status};

struct Engine {
    registry: Arc<dyn Registry>,
    loader: Arc<StaticLoader>,
    processor: Arc<QueueProcessor>,
}

fn engine() -> Engine {
    init_tracing();
    let registry: Arc<dyn Registry> = Arc::new(InMemoryRegistry::new());
    let loader = Arc::new(StaticLoader::new());
    let resolver = Arc::new(HandlerResolver::new(
        Arc::clone(&loader) as Arc<dyn HandlerLoader>
    ));
    let minter: Arc<dyn CredentialMinter> = Arc::new(SystemMinter::new(
        "system",
        "System",
        vec!["admin".into()],
        vec!["queues.process".into()],
    ));
    let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());

    let processor = Arc::new(QueueProcessor::new(
        Arc::clone(&registry),
        resolver,
        minter,
        audit,
    ));
    Engine {
        registry,
        loader,
        processor,
    }
}

fn outbox_handler() -> HandlerRef {
    HandlerRef::new("mail.outbox", "deliver")
}

/// Handler that holds each item long enough for a second trigger to race.
struct SlowHandler;

#[async_trait]
impl Handler for SlowHandler {
    async fn call(
        &self,
        _ctx: &ExecutionContext,
        _payload: Option<Value>,
    ) -> Result<Value, HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Value::Null)
    }
}

/// Test: Two triggers racing on the same queue resolve to exactly one
/// pass; the loser observes the mutex and does nothing.
#[tokio::test]
async fn test_concurrent_triggers_resolve_to_one_pass() {
    let engine = engine();
    engine
        .loader
        .register_instance(outbox_handler(), Arc::new(SlowHandler));

    let queue = Queue::new("q1", "outbox", outbox_handler());
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    let item = QueueItem::new(queue_id.clone(), json!({"to": "a@b"}), 0);
    let item_id = item.id.clone();
    engine
        .registry
        .enqueue_items(&queue_id, vec![item])
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        engine.processor.process_queue(&queue_id),
        engine.processor.process_queue(&queue_id),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    let completed = [&first, &second]
        .iter()
        .filter(|o| o.report().is_some())
        .count();
    let skipped = [&first, &second]
        .iter()
        .filter(|o| matches!(o, ProcessOutcome::AlreadyProcessing))
        .count();
    assert_eq!(completed, 1, "exactly one pass should run");
    assert_eq!(skipped, 1, "the other trigger should be skipped");

    // The item was handled exactly once.
    let item = engine.registry.get_item(&item_id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.attempts, 1);

    let queue = engine.registry.get_queue(&queue_id).await.unwrap();
    assert!(!queue.processing, "mutex must be released");
    assert_eq!(queue.total_processed, 1);
}

/// Test: A transiently failing item goes to retry and completes on the
/// next pass.
#[tokio::test]
async fn test_retry_then_success_across_passes() {
    let engine = engine();
    engine.loader.register_instance(
        outbox_handler(),
        Arc::new(FailingHandler::fail_n_times(1, "smtp timeout")),
    );

    let queue = Queue::new("q1", "outbox", outbox_handler()).with_max_attempts(3);
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    let item = QueueItem::new(queue_id.clone(), json!({"to": "a@b"}), 0);
    let item_id = item.id.clone();
    engine
        .registry
        .enqueue_items(&queue_id, vec![item])
        .await
        .unwrap();

    engine.processor.process_queue(&queue_id).await.unwrap();
    let after_first = engine.registry.get_item(&item_id).await.unwrap();
    assert_eq!(after_first.status, ItemStatus::Retry);
    assert_eq!(after_first.attempts, 1);
    assert_eq!(after_first.error.as_deref(), Some("execution failed: smtp timeout"));

    engine.processor.process_queue(&queue_id).await.unwrap();
    let after_second =
        wait_for_item_status(&*engine.registry, &item_id, ItemStatus::Completed, Duration::from_secs(1)).await;
    assert_eq!(after_second.attempts, 2);
    assert!(after_second.error.is_none());
}

/// Test: Items are handed to the handler highest priority first, oldest
/// first within a priority.
#[tokio::test]
async fn test_priority_order_observed_by_handler() {
    let engine = engine();
    let handler = RecordingHandler::succeeding();
    engine
        .loader
        .register_instance(outbox_handler(), handler.clone());

    let queue = Queue::new("q1", "outbox", outbox_handler());
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    engine
        .registry
        .enqueue_items(
            &queue_id,
            vec![
                QueueItem::new(queue_id.clone(), json!({"n": "low"}), 0),
                QueueItem::new(queue_id.clone(), json!({"n": "high"}), 10),
                QueueItem::new(queue_id.clone(), json!({"n": "mid-old"}), 5),
                QueueItem::new(queue_id.clone(), json!({"n": "mid-new"}), 5),
            ],
        )
        .await
        .unwrap();

    engine.processor.process_queue(&queue_id).await.unwrap();

    let order: Vec<String> = handler
        .invocations()
        .await
        .iter()
        .map(|i| i.payload.as_ref().unwrap()["n"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["high", "mid-old", "mid-new", "low"]);
}

/// Test: An item out of attempts becomes terminally failed and counts
/// once in the queue's failure total.
#[tokio::test]
async fn test_attempt_limit_reaches_terminal_failure() {
    let engine = engine();
    engine
        .loader
        .register_instance(outbox_handler(), Arc::new(FailingHandler::always("bounce")));

    let queue = Queue::new("q1", "outbox", outbox_handler()).with_max_attempts(2);
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    let item = QueueItem::new(queue_id.clone(), json!({"to": "a@b"}), 0);
    let item_id = item.id.clone();
    engine
        .registry
        .enqueue_items(&queue_id, vec![item])
        .await
        .unwrap();

    engine.processor.process_queue(&queue_id).await.unwrap();
    engine.processor.process_queue(&queue_id).await.unwrap();

    let item = engine.registry.get_item(&item_id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.attempts, 2);
    assert!(item.processed_at.is_some());

    let queue = engine.registry.get_queue(&queue_id).await.unwrap();
    assert_eq!(queue.total_failed, 1);
    assert_eq!(queue.total_processed, 0);

    // A further pass finds nothing eligible.
    let outcome = engine.processor.process_queue(&queue_id).await.unwrap();
    assert_eq!(outcome.report().unwrap().total, 0);
}

/// Test: The retry delay is advisory; a retry item is eligible on the
/// very next pass regardless of the configured delay.
#[tokio::test]
async fn test_retry_delay_does_not_gate_eligibility() {
    let engine = engine();
    engine.loader.register_instance(
        outbox_handler(),
        Arc::new(FailingHandler::fail_n_times(1, "flaky")),
    );

    let queue = Queue::new("q1", "outbox", outbox_handler())
        .with_max_attempts(3)
        .with_retry_delay_secs(3600);
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    let item = QueueItem::new(queue_id.clone(), json!(null), 0);
    let item_id = item.id.clone();
    engine
        .registry
        .enqueue_items(&queue_id, vec![item])
        .await
        .unwrap();

    engine.processor.process_queue(&queue_id).await.unwrap();
    engine.processor.process_queue(&queue_id).await.unwrap();

    let item = engine.registry.get_item(&item_id).await.unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
}

/// Test: A backlog larger than the batch cap is drained over multiple
/// passes.
#[tokio::test]
async fn test_backlog_drains_over_multiple_passes() {
    let engine = engine();
    let handler = RecordingHandler::succeeding();
    engine
        .loader
        .register_instance(outbox_handler(), handler.clone());

    let queue = Queue::new("q1", "outbox", outbox_handler()).with_items_per_batch(2);
    let queue_id = queue.id.clone();
    engine.registry.save_queue(queue).await.unwrap();

    let items: Vec<_> = (0..5)
        .map(|i| QueueItem::new(queue_id.clone(), json!({"n": i}), 0))
        .collect();
    engine
        .registry
        .enqueue_items(&queue_id, items)
        .await
        .unwrap();

    let totals: Vec<u64> = [
        engine.processor.process_queue(&queue_id).await.unwrap(),
        engine.processor.process_queue(&queue_id).await.unwrap(),
        engine.processor.process_queue(&queue_id).await.unwrap(),
    ]
    .iter()
    .map(|o| o.report().unwrap().total)
    .collect();
    assert_eq!(totals, vec![2, 2, 1]);

    assert_eq!(handler.call_count().await, 5);
    let queue = engine.registry.get_queue(&queue_id).await.unwrap();
    assert_eq!(queue.total_processed, 5);
}
