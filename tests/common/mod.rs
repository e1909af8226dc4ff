//! Common test utilities shared across integration tests.

use cadence::{ItemId, ItemStatus, QueueItem, Registry};
use std::time::Duration;

/// Install a tracing subscriber that captures engine logs per test.
///
/// Safe to call from every test; only the first call installs. Honors
/// `RUST_LOG` for filtering.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for a queue item to reach an expected status, polling the registry.
///
/// More reliable than fixed sleeps since pass timing can vary. Polls every
/// 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the item reaches the expected
/// status.
pub async fn wait_for_item_status(
    registry: &dyn Registry,
    item_id: &ItemId,
    expected: ItemStatus,
    timeout: Duration,
) -> QueueItem {
    let start = tokio::time::Instant::now();
    loop {
        let item = registry.get_item(item_id).await.unwrap();
        if item.status == expected {
            return item;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for item {} to reach {:?}, current status: {:?}",
                item_id, expected, item.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a condition holds, polling every 10ms.
///
/// # Panics
///
/// Panics with the given message if the timeout is reached first.
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration, message: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition().await {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout: {}", message);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
