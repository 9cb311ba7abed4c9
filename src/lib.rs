//! Process wiring for the microhost server: opens the record store and
//! assembles the lifecycle services on top of a container runtime.

use microhost_control::{ContainerManager, Orchestrator, Reconciler, RecordStore, SqliteRecordStore};
use microhost_metrics::PrometheusMetrics;
use microhost_models::{Config, OrchestratorError};
use microhost_packaging::ImageBuilder;
use microhost_runtime::{ContainerRuntime, NameLocks};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything a running server shares between the API and the reconciler.
pub struct Services {
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Reconciler,
}

/// `sqlite://data/x.db` and `sqlite:data/x.db` both point at `data/x.db`.
fn sqlite_file(db_url: &str) -> Option<&str> {
    db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .filter(|path| !path.is_empty() && !path.starts_with(":memory:"))
}

/// Creates the database's parent directory, then connects and migrates.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteRecordStore>, OrchestratorError> {
    if let Some(path) = sqlite_file(&config.data.db_url) {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| OrchestratorError::Store {
                reason: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
    }

    let store = SqliteRecordStore::connect(
        &config.data.db_url,
        config.history.max_entries_per_container,
    )
    .await?;
    info!("Record store ready at {}", config.data.db_url);
    Ok(Arc::new(store))
}

/// Builder and manager share one set of name locks, so a build and a
/// lifecycle call on the same name never interleave.
pub fn assemble(
    config: &Config,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn RecordStore>,
) -> Result<Services, OrchestratorError> {
    let locks = NameLocks::new();
    let manager = Arc::new(ContainerManager::new(
        runtime.clone(),
        locks.clone(),
        config.runtime.clone(),
    ));
    let builder = Arc::new(ImageBuilder::new(runtime, locks, &config.build));
    let metrics = Arc::new(PrometheusMetrics::new()?);

    let orchestrator = Arc::new(Orchestrator::new(
        manager.clone(),
        builder,
        store.clone(),
        metrics.clone(),
    ));
    let reconciler = Reconciler::new(manager, store, metrics, config.reconcile.clone());

    Ok(Services {
        orchestrator,
        reconciler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_paths() {
        assert_eq!(sqlite_file("sqlite://data/microhost.db"), Some("data/microhost.db"));
        assert_eq!(sqlite_file("sqlite:state.db"), Some("state.db"));
        assert_eq!(sqlite_file("sqlite::memory:"), None);
        assert_eq!(sqlite_file("postgres://x"), None);
    }
}
