use std::time::Duration;

use silo_host::ClusterConfig;
use silo_host::Error;
use silo_host::IsolationError;
use silo_host::SiloState;

use crate::common::custom;
use crate::common::test_context;
use crate::common::PANICKING_LOCATION;
use crate::common::RECORDING_LOCATION;

/// A provider crash surfaces as a value and leaves both the test task and
/// the driver usable.
#[tokio::test]
async fn provider_panic_is_contained_per_attempt() {
    crate::enable_logger();
    let ctx = test_context(Duration::ZERO);
    let config = ClusterConfig::localhost_primary();

    let crashed = ctx.driver.attempt(&custom(config.clone(), PANICKING_LOCATION)).await;

    match crashed.error() {
        Some(Error::Isolation(IsolationError::Panicked(msg))) => {
            assert!(msg.contains("membership store client crashed"))
        }
        other => panic!("expected a contained panic, got {other:?}"),
    }
    // The boundary tried to detach what the dead controller left behind
    assert_eq!(crashed.teardown.forced_detaches, 1);
    assert_eq!(crashed.teardown.failed_detaches, 1);

    let recovered = ctx.driver.attempt(&config).await;
    assert_eq!(recovered.result.ok(), Some(SiloState::Running));
    assert!(ctx.table.is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_attempts_on_one_cluster_never_attach_concurrently() {
    let ctx = test_context(Duration::from_millis(200));
    let first = custom(ClusterConfig::localhost_primary(), RECORDING_LOCATION);
    let mut second = first.clone();
    second.silo_name = "silo-2".to_string();

    let (a, b) = tokio::join!(ctx.driver.attempt(&first), ctx.driver.attempt(&second));

    assert!(a.is_running() && b.is_running());
    assert_eq!(ctx.ledger.max_in_flight(), 1);
    assert_eq!(ctx.ledger.detaches(), 2);
}

#[tokio::test(start_paused = true)]
async fn attempts_on_different_clusters_run_side_by_side() {
    let ctx = test_context(Duration::from_millis(200));
    let first = custom(ClusterConfig::localhost_primary(), RECORDING_LOCATION);
    let second = custom(ClusterConfig::localhost_primary(), RECORDING_LOCATION);

    let (a, b) = tokio::join!(ctx.driver.attempt(&first), ctx.driver.attempt(&second));

    assert!(a.is_running() && b.is_running());
    assert_eq!(ctx.ledger.max_in_flight(), 2);
}
