use std::io::Write;
use std::time::Duration;

use silo_host::AttemptOutcome;
use silo_host::ClusterConfig;
use silo_host::Error;
use silo_host::FailureStage;
use silo_host::LivenessKind;
use silo_host::LoadError;
use silo_host::MembershipKey;
use silo_host::SiloConfig;
use silo_host::SiloState;
use silo_host::StateTransitionError;

use crate::common::custom;
use crate::common::test_context;
use crate::common::REMINDERS_LOCATION;

/// A silo pointed at a provider that does not exist fails, is disposed, and
/// a fresh attempt with the original settings runs without any trace of the
/// failed one.
#[tokio::test]
async fn silo_restarts_after_bad_provider_location() {
    crate::enable_logger();
    let ctx = test_context(Duration::ZERO);
    let good = ClusterConfig::localhost_primary();
    let key = MembershipKey {
        cluster_id: good.cluster_id.clone(),
        silo_name: good.silo_name.clone(),
    };

    let bad = custom(good.clone(), "NonExistentAssembly.jpg");
    let failed = ctx
        .driver
        .attempt_with(&bad, None, |mut silo| async move {
            let err = silo.initialize().expect_err("missing unit must fail initialize");
            assert_eq!(silo.state(), SiloState::Failed);
            assert!(matches!(
                silo.start(false).await,
                Err(Error::InvalidState(StateTransitionError::InvalidState { state: SiloState::Failed, .. }))
            ));
            silo.uninitialize()?;
            Err::<(), Error>(err)
        })
        .await;

    assert_eq!(failed.outcome(), AttemptOutcome::Failed);
    let err = failed.error().expect("captured");
    assert!(matches!(err.root_cause(), Error::Load(LoadError::NotFound { .. })));
    let cause = err.failure_cause().expect("diagnosable without re-running");
    assert_eq!(cause.stage, FailureStage::Initialize);
    assert_eq!(cause.liveness_kind, LivenessKind::Custom);
    assert_eq!(cause.provider_location, "NonExistentAssembly.jpg");
    assert_eq!(cause.cluster_id, good.cluster_id);
    assert_eq!(failed.final_state, Some(SiloState::Disposed));
    assert!(failed.teardown.is_clean());
    assert!(ctx.table.is_empty());

    let table = ctx.table.clone();
    let running = ctx
        .driver
        .attempt_with(&good, None, move |mut silo| async move {
            silo.initialize()?;
            let started = silo.start(false).await?;
            assert!(started);
            assert_eq!(table.members(&key.cluster_id), vec![key.silo_name.clone()]);
            silo.stop().await?;
            Ok(silo.state())
        })
        .await;

    assert_eq!(running.outcome(), AttemptOutcome::Running);
    assert_eq!(running.result.ok(), Some(SiloState::Stopped));
    assert!(ctx.table.is_empty());
}

#[tokio::test]
async fn wrong_component_kind_is_a_type_mismatch() {
    let ctx = test_context(Duration::ZERO);

    let attempt = ctx
        .driver
        .attempt(&custom(ClusterConfig::localhost_primary(), REMINDERS_LOCATION))
        .await;

    assert!(matches!(
        attempt.error().map(|e| e.root_cause()),
        Some(Error::Load(LoadError::TypeMismatch { .. }))
    ));
}

#[tokio::test]
async fn custom_kind_without_location_is_rejected_before_loading() {
    let ctx = test_context(Duration::ZERO);

    let attempt = ctx.driver.attempt(&custom(ClusterConfig::localhost_primary(), "")).await;

    assert!(matches!(
        attempt.error().map(|e| e.root_cause()),
        Some(Error::Load(LoadError::InvalidConfiguration(_)))
    ));
    assert_eq!(ctx.ledger.detaches(), 0);
}

/// Settings read from a file drive the attempt and can be corrected between
/// attempts without reloading anything else.
#[tokio::test]
async fn attempt_with_file_settings() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[cluster]
cluster_id = "orders"
silo_name = "silo-a"
liveness_kind = "custom"
provider_location = "NonExistentAssembly.jpg"
"#
    )
    .unwrap();

    let settings = SiloConfig::default()
        .with_override_config(file.path().to_str().unwrap())
        .unwrap()
        .validate()
        .unwrap();
    assert_eq!(settings.cluster.liveness_kind, LivenessKind::Custom);

    let ctx = test_context(Duration::ZERO);
    let mut cluster = settings.cluster.clone();
    assert!(!ctx.driver.attempt(&cluster).await.is_running());

    cluster.liveness_kind = LivenessKind::InMemory;
    cluster.provider_location.clear();
    let attempt = ctx.driver.attempt(&cluster).await;
    assert!(attempt.is_running(), "{:?}", attempt.error());
    assert_eq!(attempt.result.ok(), Some(SiloState::Running));
    assert!(ctx.table.is_empty());
}
