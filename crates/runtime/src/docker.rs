use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::Docker;

use async_trait::async_trait;
use futures_util::StreamExt;
use microhost_models::{
    OrchestratorError, RuntimeConfig, RuntimeContainerSummary, RuntimeContainerView,
    RuntimeImageSummary,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSpec {
    pub image: String,
    pub name: String,
    /// e.g. `8000/tcp`
    pub exposed_ports: Vec<String>,
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
    pub network: Option<String>,
}

impl Default for CreateSpec {
    fn default() -> Self {
        Self {
            image: "test:latest".to_string(),
            name: "test-container".to_string(),
            exposed_ports: vec![],
            env: vec![],
            labels: vec![],
            network: None,
        }
    }
}

/// Gateway to the container runtime. Holds no state of its own; every answer
/// comes from the daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), OrchestratorError>;
    async fn list_images(&self) -> Result<Vec<RuntimeImageSummary>, OrchestratorError>;
    /// Pull progress goes to the log, not to the caller.
    async fn pull_image(&self, image_ref: &str) -> Result<(), OrchestratorError>;
    /// `context` is a tar archive. Build output goes to the log.
    async fn build_image(
        &self,
        context: Vec<u8>,
        tag: &str,
        dockerfile: &str,
    ) -> Result<(), OrchestratorError>;
    async fn create_container(&self, spec: CreateSpec) -> Result<String, OrchestratorError>;
    /// Starting a running container succeeds.
    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError>;
    /// Stopping a stopped container succeeds.
    async fn stop_container(&self, name: &str, timeout_secs: u64)
        -> Result<(), OrchestratorError>;
    async fn remove_container(&self, name: &str, force: bool) -> Result<(), OrchestratorError>;
    async fn inspect_container(&self, name: &str)
        -> Result<RuntimeContainerView, OrchestratorError>;
    async fn list_containers(
        &self,
        all: bool,
    ) -> Result<Vec<RuntimeContainerSummary>, OrchestratorError>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect(config: &RuntimeConfig) -> Result<Self, OrchestratorError> {
        let host = if config.docker_host.is_empty() {
            std::env::var("DOCKER_HOST").unwrap_or_default()
        } else {
            config.docker_host.clone()
        };

        let docker = if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(&host, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                OrchestratorError::runtime(format!("Failed to connect to Docker at {host}: {e}"))
            })?
        } else if let Some(path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                OrchestratorError::runtime(format!("Failed to connect to Docker at {host}: {e}"))
            })?
        } else {
            Docker::connect_with_socket_defaults()
                .map_err(|e| OrchestratorError::runtime(e.to_string()))?
        };

        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Polls the daemon until it answers or `timeout` elapses.
pub async fn wait_for_daemon(
    runtime: &dyn ContainerRuntime,
    timeout: Duration,
) -> Result<(), OrchestratorError> {
    let start = std::time::Instant::now();
    loop {
        match runtime.ping().await {
            Ok(()) => return Ok(()),
            Err(e) if start.elapsed() >= timeout => {
                return Err(OrchestratorError::runtime(format!(
                    "container runtime not reachable after {}s: {e}",
                    timeout.as_secs()
                )));
            }
            Err(e) => {
                debug!("runtime not ready yet: {}", e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// 404 -> NotFound, 409 -> Conflict, everything else is a runtime failure.
fn map_err(name: &str, action: &str, err: BollardError) -> OrchestratorError {
    match status_code(&err) {
        Some(404) => OrchestratorError::container_not_found(name),
        Some(409) => OrchestratorError::conflict(format!("cannot {action} {name}: {err}")),
        _ => OrchestratorError::runtime(format!("failed to {action} {name}: {err}")),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::runtime(format!("ping failed: {e}")))
    }

    #[instrument(skip(self))]
    async fn list_images(&self) -> Result<Vec<RuntimeImageSummary>, OrchestratorError> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };

        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| OrchestratorError::runtime(format!("Failed to list images: {e}")))?;

        Ok(images
            .into_iter()
            .map(|image| RuntimeImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image_ref: &str) -> Result<(), OrchestratorError> {
        info!("Pulling image {}", image_ref);
        let options = CreateImageOptions {
            from_image: image_ref.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(item) = stream.next().await {
            match item {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(
                            image = %image_ref,
                            progress = %progress.progress.unwrap_or_default(),
                            "{}", status
                        );
                    }
                }
                Err(e) => {
                    error!("Pull of {} failed: {}", image_ref, e);
                    return Err(map_err(image_ref, "pull", e));
                }
            }
        }

        info!("Pulled image {}", image_ref);
        Ok(())
    }

    #[instrument(skip(self, context), fields(context_bytes = context.len()))]
    async fn build_image(
        &self,
        context: Vec<u8>,
        tag: &str,
        dockerfile: &str,
    ) -> Result<(), OrchestratorError> {
        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => {
                    if let Some(message) = output.error {
                        error!(tag = %tag, "Build failed: {}", message);
                        return Err(OrchestratorError::runtime(format!(
                            "build of {tag} failed: {message}"
                        )));
                    }
                    if let Some(line) = output.stream {
                        let line = line.trim_end();
                        if !line.is_empty() {
                            info!(tag = %tag, "{}", line);
                        }
                    }
                }
                Err(e) => {
                    error!(tag = %tag, "Build stream error: {}", e);
                    return Err(OrchestratorError::runtime(format!(
                        "build of {tag} failed: {e}"
                    )));
                }
            }
        }

        info!("Built image {}", tag);
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create_container(&self, spec: CreateSpec) -> Result<String, OrchestratorError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (port.clone(), HashMap::new()))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(exposed_ports),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(spec.labels.iter().cloned().collect()),
            host_config: Some(HostConfig {
                network_mode: spec.network.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_err(&spec.name, "create", e))?;

        for warning in &response.warnings {
            warn!("create {}: {}", spec.name, warning);
        }
        info!("Created container {} with ID {}", spec.name, response.id);
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => {}
            Err(e) if status_code(&e) == Some(304) => {
                debug!("Container {} already running", name);
            }
            Err(e) => return Err(map_err(name, "start", e)),
        }

        info!("Started container {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop_container(
        &self,
        name: &str,
        timeout_secs: u64,
    ) -> Result<(), OrchestratorError> {
        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => {}
            Err(e) if status_code(&e) == Some(304) => {
                debug!("Container {} already stopped", name);
            }
            Err(e) => return Err(map_err(name, "stop", e)),
        }

        info!("Stopped container {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_container(&self, name: &str, force: bool) -> Result<(), OrchestratorError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_err(name, "remove", e))?;

        info!("Removed container {}", name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<RuntimeContainerView, OrchestratorError> {
        let container = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(name, "inspect", e))?;

        let (running, status) = match container.state {
            Some(state) => (
                state.running.unwrap_or(false),
                state.status.map(|s| s.to_string()).unwrap_or_default(),
            ),
            None => (false, String::new()),
        };
        debug!("Container {} status: {}", name, status);

        Ok(RuntimeContainerView {
            name: container
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            running,
            status,
            image_ref: container
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
        })
    }

    #[instrument(skip(self))]
    async fn list_containers(
        &self,
        all: bool,
    ) -> Result<Vec<RuntimeContainerSummary>, OrchestratorError> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| OrchestratorError::runtime(format!("Failed to list containers: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| RuntimeContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            })
            .collect())
    }
}
