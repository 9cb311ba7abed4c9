mod common;

use common::{record, Harness};
use microhost_control::RecordStore;
use microhost_models::TransitionAction;
use microhost_testsupport::FakeOp;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn one_cycle_starts_exactly_the_stopped_ones() {
    let h = Harness::new().await;
    // N = 5 desired running, M = 3 of them stopped, plus one desired stopped
    for (name, running) in [
        ("a", true),
        ("b", false),
        ("c", false),
        ("d", true),
        ("e", false),
    ] {
        h.runtime.add_container(name, &format!("{name}:latest"), running).await;
        h.store.save(&record(name, true)).await.unwrap();
    }
    h.runtime.add_container("off", "off:latest", false).await;
    h.store.save(&record("off", false)).await.unwrap();

    let reconciler = h.reconciler(false);
    let summary = reconciler.run_cycle().await.unwrap();

    assert_eq!(summary.total, 6);
    assert_eq!(summary.started, 3);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.failed, 0);
    let mut started = h.runtime.started.lock().await.clone();
    started.sort();
    assert_eq!(started, vec!["b", "c", "e"]);
    assert!(!h.runtime.is_running("off").await);

    // no external change: nothing more to do
    let second = reconciler.run_cycle().await.unwrap();
    assert_eq!(second.started, 0);
    assert_eq!(h.runtime.start_count().await, 3);
}

#[tokio::test]
async fn inspect_failure_does_not_stop_the_cycle() {
    let h = Harness::new().await;
    h.runtime.add_container("b", "b:latest", false).await;
    h.store.save(&record("a", true)).await.unwrap();
    h.store.save(&record("b", true)).await.unwrap();
    h.store.save(&record("missing", true)).await.unwrap();
    h.runtime.add_container("a", "a:latest", false).await;
    h.runtime.fail(FakeOp::Inspect, Some("a"), "daemon hiccup").await;

    let summary = h.reconciler(false).run_cycle().await.unwrap();

    assert_eq!(summary.started, 1);
    assert_eq!(summary.failed, 2);
    assert!(h.runtime.is_running("b").await);
    // missing containers are not recreated by default
    assert_eq!(h.runtime.create_count().await, 0);
}

#[tokio::test]
async fn failed_start_is_retried_next_cycle() {
    let h = Harness::new().await;
    h.runtime.add_container("a", "a:latest", false).await;
    h.store.save(&record("a", true)).await.unwrap();
    h.runtime.fail(FakeOp::Start, Some("a"), "port in use").await;

    let reconciler = h.reconciler(false);
    assert_eq!(reconciler.run_cycle().await.unwrap().failed, 1);

    h.runtime.clear_failures().await;
    assert_eq!(reconciler.run_cycle().await.unwrap().started, 1);
    assert!(h.runtime.is_running("a").await);

    let history = h.store.history_for_container("a", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|t| t.action == TransitionAction::Reconcile));
    assert!(history[0].outcome.is_success());
    assert!(!history[1].outcome.is_success());
}

#[tokio::test]
async fn recreate_missing_uses_recorded_image() {
    let h = Harness::new().await;
    h.runtime.add_image("svc1:latest").await;
    h.store.save(&record("svc1", true)).await.unwrap();

    let summary = h.reconciler(true).run_cycle().await.unwrap();

    assert_eq!(summary.recreated, 1);
    assert!(h.runtime.is_running("svc1").await);
    assert_eq!(h.runtime.last_created().await.image, "svc1:latest");
}

#[tokio::test]
async fn out_of_band_death_is_recovered() {
    let h = Harness::new().await;
    h.runtime.add_image("svc1:latest").await;
    h.orchestrator
        .create_container(
            common::USER,
            microhost_models::CreateContainerRequest {
                image: "svc1".into(),
                name: None,
            },
        )
        .await
        .unwrap();

    h.runtime.kill("svc1").await;
    let summary = h.reconciler(false).run_cycle().await.unwrap();

    assert_eq!(summary.started, 1);
    assert!(h.runtime.is_running("svc1").await);
}

#[tokio::test]
async fn run_loop_exits_on_cancel() {
    let h = Harness::new().await;
    h.runtime.add_container("a", "a:latest", false).await;
    h.store.save(&record("a", true)).await.unwrap();

    let reconciler = Arc::new(h.reconciler(false));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    // the first tick fires immediately
    tokio::time::timeout(Duration::from_secs(2), async {
        while !h.runtime.is_running("a").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first cycle should start the container");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("reconciler should stop promptly")
        .unwrap();
    assert_eq!(h.metrics.reconcile_cycles(), 1);
}
