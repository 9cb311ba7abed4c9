#![allow(dead_code)]

use microhost_control::{ContainerManager, Orchestrator, Reconciler, SqliteRecordStore};
use microhost_metrics::PrometheusMetrics;
use microhost_models::{BuildConfig, Config, ContainerRecord, ReconcileConfig, RuntimeConfig};
use microhost_packaging::ImageBuilder;
use microhost_runtime::NameLocks;
use microhost_testsupport::FakeRuntime;
use std::sync::Arc;
use tempfile::TempDir;

pub const USER: &str = "user-1";
pub const OTHER_USER: &str = "user-2";

pub fn runtime_config() -> RuntimeConfig {
    Config::default().runtime
}

pub fn reconcile_config(recreate_missing: bool) -> ReconcileConfig {
    ReconcileConfig {
        interval_secs: 60,
        recreate_missing,
    }
}

pub async fn memory_store() -> Arc<SqliteRecordStore> {
    Arc::new(SqliteRecordStore::in_memory(50).await.expect("in-memory store"))
}

pub fn manager(runtime: &Arc<FakeRuntime>) -> Arc<ContainerManager> {
    Arc::new(ContainerManager::new(
        runtime.clone(),
        NameLocks::new(),
        runtime_config(),
    ))
}

pub struct Harness {
    pub runtime: Arc<FakeRuntime>,
    pub store: Arc<SqliteRecordStore>,
    pub manager: Arc<ContainerManager>,
    pub metrics: Arc<PrometheusMetrics>,
    pub orchestrator: Arc<Orchestrator>,
    pub workspace: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let runtime = FakeRuntime::shared();
        let store = memory_store().await;
        let locks = NameLocks::new();
        let manager = Arc::new(ContainerManager::new(
            runtime.clone(),
            locks.clone(),
            runtime_config(),
        ));
        let workspace = tempfile::tempdir().expect("tempdir");
        let builder = Arc::new(ImageBuilder::new(
            runtime.clone(),
            locks,
            &BuildConfig {
                workspace_dir: workspace.path().to_string_lossy().to_string(),
                max_workspace_age_secs: 3600,
                max_workspaces: 10,
                max_upload_mb: 20,
            },
        ));
        let metrics = Arc::new(PrometheusMetrics::new().expect("metrics"));
        let orchestrator = Arc::new(Orchestrator::new(
            manager.clone(),
            builder,
            store.clone(),
            metrics.clone(),
        ));

        Self {
            runtime,
            store,
            manager,
            metrics,
            orchestrator,
            workspace,
        }
    }

    pub fn reconciler(&self, recreate_missing: bool) -> Reconciler {
        Reconciler::new(
            self.manager.clone(),
            self.store.clone(),
            self.metrics.clone(),
            reconcile_config(recreate_missing),
        )
    }
}

pub fn record(name: &str, desired_running: bool) -> ContainerRecord {
    ContainerRecord::new(USER, name, Some(format!("{name}:latest")), desired_running)
}
