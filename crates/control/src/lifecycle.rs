use microhost_models::{OrchestratorError, RuntimeConfig, RuntimeContainerView};
use microhost_runtime::{ContainerRuntime, CreateSpec, NameGuard, NameLocks};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Labels that make the reverse proxy route `/<name>` to the container.
pub fn proxy_labels(name: &str, port: u16) -> Vec<(String, String)> {
    vec![
        ("traefik.enable".to_string(), "true".to_string()),
        (
            format!("traefik.http.routers.{name}.rule"),
            format!("PathPrefix(`/{name}`)"),
        ),
        (
            format!("traefik.http.services.{name}.loadbalancer.server.port"),
            port.to_string(),
        ),
    ]
}

/// Create/start/stop/remove for named containers.
///
/// Every mutating call runs under the name's lock. The `*_guarded` variants
/// expect the caller to already hold it, so a runtime mutation and the record
/// write that follows can share one critical section.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    locks: NameLocks,
    config: RuntimeConfig,
}

impl ContainerManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, locks: NameLocks, config: RuntimeConfig) -> Self {
        Self {
            runtime,
            locks,
            config,
        }
    }

    pub fn locks(&self) -> &NameLocks {
        &self.locks
    }

    pub async fn lock(&self, name: &str) -> NameGuard {
        self.locks.lock(name).await
    }

    pub fn create_spec(&self, image_ref: &str, name: &str) -> CreateSpec {
        CreateSpec {
            image: image_ref.to_string(),
            name: name.to_string(),
            exposed_ports: vec![format!("{}/tcp", self.config.service_port)],
            env: vec![(self.config.env_name_var.clone(), name.to_string())],
            labels: proxy_labels(name, self.config.service_port),
            network: Some(self.config.network.clone()),
        }
    }

    /// Exact tag match against the local image list.
    pub async fn image_exists(&self, image_ref: &str) -> Result<bool, OrchestratorError> {
        let images = self.runtime.list_images().await?;
        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| tag == image_ref)))
    }

    /// Observed state, straight from the runtime.
    pub async fn is_running(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(self.runtime.inspect_container(name).await?.running)
    }

    pub async fn inspect(&self, name: &str) -> Result<RuntimeContainerView, OrchestratorError> {
        self.runtime.inspect_container(name).await
    }

    /// Never replaces an existing container.
    pub async fn create(&self, image_ref: &str, name: &str) -> Result<(), OrchestratorError> {
        let guard = self.lock(name).await;
        self.create_guarded(&guard, image_ref, false).await
    }

    /// Pulls the image if missing, creates the container and starts it.
    /// Fails with Conflict if the name is already running. A stopped container
    /// holding the name is replaced only when `replace_stopped` is set, which
    /// callers reserve for names the requesting user already owns; otherwise
    /// it is left untouched and the call fails with Conflict.
    #[instrument(skip(self, guard), fields(name = %guard.name()))]
    pub async fn create_guarded(
        &self,
        guard: &NameGuard,
        image_ref: &str,
        replace_stopped: bool,
    ) -> Result<(), OrchestratorError> {
        let name = guard.name();

        match self.is_running(name).await {
            Ok(true) => {
                return Err(OrchestratorError::conflict(format!(
                    "container {name} is already running"
                )));
            }
            Ok(false) if !replace_stopped => {
                return Err(OrchestratorError::conflict(format!(
                    "a container named {name} already exists"
                )));
            }
            Ok(false) => {
                warn!("Replacing stopped container {}", name);
                self.runtime.remove_container(name, true).await?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if !self.image_exists(image_ref).await? {
            info!("Image {} not present locally, pulling", image_ref);
            self.runtime.pull_image(image_ref).await?;
        }

        let id = self
            .runtime
            .create_container(self.create_spec(image_ref, name))
            .await?;
        self.runtime.start_container(name).await?;

        info!("Container {} ({}) running from {}", name, id, image_ref);
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        let guard = self.lock(name).await;
        self.start_guarded(&guard).await
    }

    pub async fn start_guarded(&self, guard: &NameGuard) -> Result<(), OrchestratorError> {
        self.runtime.start_container(guard.name()).await
    }

    pub async fn stop(&self, name: &str) -> Result<(), OrchestratorError> {
        let guard = self.lock(name).await;
        self.stop_guarded(&guard).await
    }

    pub async fn stop_guarded(&self, guard: &NameGuard) -> Result<(), OrchestratorError> {
        self.runtime
            .stop_container(guard.name(), self.config.stop_timeout_secs)
            .await
    }

    pub async fn stop_and_remove(&self, name: &str) -> Result<(), OrchestratorError> {
        let guard = self.lock(name).await;
        self.stop_and_remove_guarded(&guard).await
    }

    /// Only the removal decides the result; a failed stop is logged.
    #[instrument(skip(self, guard), fields(name = %guard.name()))]
    pub async fn stop_and_remove_guarded(&self, guard: &NameGuard) -> Result<(), OrchestratorError> {
        let name = guard.name();
        if let Err(e) = self
            .runtime
            .stop_container(name, self.config.stop_timeout_secs)
            .await
        {
            warn!("Stop before removal of {} failed: {}", name, e);
        }
        self.runtime.remove_container(name, true).await
    }
}
