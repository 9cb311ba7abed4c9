use async_trait::async_trait;
use microhost_models::{
    OrchestratorError, RuntimeContainerSummary, RuntimeContainerView, RuntimeImageSummary,
};
use microhost_runtime::{ContainerRuntime, CreateSpec};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Ping,
    Pull,
    Build,
    Create,
    Start,
    Stop,
    Remove,
    Inspect,
    List,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub running: bool,
    pub spec: CreateSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FakeBuild {
    pub tag: String,
    pub dockerfile: String,
    /// Entries found in the tar context, with any leading `./` removed.
    pub files: HashMap<String, Vec<u8>>,
}

/// In-memory stand-in for the daemon. Mirrors its observable semantics:
/// name conflicts on create, idempotent start/stop, NotFound for unknown names.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    pub containers: Arc<Mutex<HashMap<String, FakeContainer>>>,
    pub images: Arc<Mutex<Vec<String>>>,
    pub created: Arc<Mutex<Vec<CreateSpec>>>,
    pub started: Arc<Mutex<Vec<String>>>,
    pub stopped: Arc<Mutex<Vec<(String, u64)>>>,
    pub removed: Arc<Mutex<Vec<(String, bool)>>>,
    pub pulled: Arc<Mutex<Vec<String>>>,
    pub builds: Arc<Mutex<Vec<FakeBuild>>>,
    /// `None` name fails the op for every name.
    pub failures: Arc<Mutex<HashMap<(FakeOp, Option<String>), String>>>,
    pub build_delay: Arc<Mutex<Option<Duration>>>,
    pub next_id: Arc<Mutex<u64>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn add_image(&self, tag: &str) {
        let mut images = self.images.lock().await;
        if !images.iter().any(|t| t == tag) {
            images.push(tag.to_string());
        }
    }

    /// Places a container directly, bypassing the recorded calls.
    pub async fn add_container(&self, name: &str, image: &str, running: bool) {
        let id = self.allocate_id().await;
        self.containers.lock().await.insert(
            name.to_string(),
            FakeContainer {
                id,
                image: image.to_string(),
                running,
                spec: CreateSpec {
                    image: image.to_string(),
                    name: name.to_string(),
                    ..Default::default()
                },
            },
        );
    }

    /// Simulates the workload exiting on its own.
    pub async fn kill(&self, name: &str) {
        if let Some(c) = self.containers.lock().await.get_mut(name) {
            c.running = false;
        }
    }

    /// Simulates someone removing the container behind our back.
    pub async fn delete_out_of_band(&self, name: &str) {
        self.containers.lock().await.remove(name);
    }

    pub async fn fail(&self, op: FakeOp, name: Option<&str>, message: &str) {
        self.failures
            .lock()
            .await
            .insert((op, name.map(str::to_string)), message.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub async fn set_build_delay(&self, delay: Duration) {
        *self.build_delay.lock().await = Some(delay);
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.containers
            .lock()
            .await
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub async fn container(&self, name: &str) -> Option<FakeContainer> {
        self.containers.lock().await.get(name).cloned()
    }

    pub async fn start_count(&self) -> usize {
        self.started.lock().await.len()
    }

    pub async fn create_count(&self) -> usize {
        self.created.lock().await.len()
    }

    pub async fn last_created(&self) -> CreateSpec {
        self.created
            .lock()
            .await
            .last()
            .cloned()
            .expect("no create")
    }

    pub async fn last_build(&self) -> FakeBuild {
        self.builds.lock().await.last().cloned().expect("no build")
    }

    async fn allocate_id(&self) -> String {
        let mut id = self.next_id.lock().await;
        *id += 1;
        format!("ctr-{}", *id)
    }

    async fn check(&self, op: FakeOp, name: &str) -> Result<(), OrchestratorError> {
        let failures = self.failures.lock().await;
        let hit = failures
            .get(&(op, Some(name.to_string())))
            .or_else(|| failures.get(&(op, None)));
        match hit {
            Some(message) => Err(OrchestratorError::runtime(message.clone())),
            None => Ok(()),
        }
    }
}

fn read_context(context: &[u8]) -> Result<HashMap<String, Vec<u8>>, OrchestratorError> {
    let mut files = HashMap::new();
    let mut archive = tar::Archive::new(context);
    let entries = archive
        .entries()
        .map_err(|e| OrchestratorError::runtime(format!("bad build context: {e}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| OrchestratorError::runtime(format!("bad build context: {e}")))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| OrchestratorError::runtime(e.to_string()))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| OrchestratorError::runtime(e.to_string()))?;
        files.insert(path, contents);
    }
    Ok(files)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.check(FakeOp::Ping, "").await
    }

    async fn list_images(&self) -> Result<Vec<RuntimeImageSummary>, OrchestratorError> {
        self.check(FakeOp::List, "").await?;
        Ok(self
            .images
            .lock()
            .await
            .iter()
            .enumerate()
            .map(|(i, tag)| RuntimeImageSummary {
                id: format!("sha256:{i:064}"),
                repo_tags: vec![tag.clone()],
            })
            .collect())
    }

    async fn pull_image(&self, image_ref: &str) -> Result<(), OrchestratorError> {
        self.check(FakeOp::Pull, image_ref).await?;
        self.pulled.lock().await.push(image_ref.to_string());
        self.add_image(image_ref).await;
        Ok(())
    }

    async fn build_image(
        &self,
        context: Vec<u8>,
        tag: &str,
        dockerfile: &str,
    ) -> Result<(), OrchestratorError> {
        let delay = *self.build_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(FakeOp::Build, tag).await?;
        let files = read_context(&context)?;
        if !files.contains_key(dockerfile) {
            return Err(OrchestratorError::runtime(format!(
                "build of {tag} failed: {dockerfile} missing from context"
            )));
        }
        self.builds.lock().await.push(FakeBuild {
            tag: tag.to_string(),
            dockerfile: dockerfile.to_string(),
            files,
        });
        self.add_image(tag).await;
        Ok(())
    }

    async fn create_container(&self, spec: CreateSpec) -> Result<String, OrchestratorError> {
        self.check(FakeOp::Create, &spec.name).await?;
        if !self.images.lock().await.iter().any(|t| *t == spec.image) {
            return Err(OrchestratorError::NotFound {
                resource: "Image",
                name: spec.image.clone(),
            });
        }
        if self.containers.lock().await.contains_key(&spec.name) {
            return Err(OrchestratorError::conflict(format!(
                "container name {} already in use",
                spec.name
            )));
        }

        let id = self.allocate_id().await;
        self.created.lock().await.push(spec.clone());
        self.containers.lock().await.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                image: spec.image.clone(),
                running: false,
                spec,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<(), OrchestratorError> {
        self.check(FakeOp::Start, name).await?;
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))?;
        container.running = true;
        self.started.lock().await.push(name.to_string());
        Ok(())
    }

    async fn stop_container(
        &self,
        name: &str,
        timeout_secs: u64,
    ) -> Result<(), OrchestratorError> {
        self.check(FakeOp::Stop, name).await?;
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))?;
        container.running = false;
        self.stopped
            .lock()
            .await
            .push((name.to_string(), timeout_secs));
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<(), OrchestratorError> {
        self.check(FakeOp::Remove, name).await?;
        let mut containers = self.containers.lock().await;
        match containers.get(name) {
            None => return Err(OrchestratorError::container_not_found(name)),
            Some(c) if c.running && !force => {
                return Err(OrchestratorError::conflict(format!(
                    "cannot remove running container {name}"
                )));
            }
            Some(_) => {}
        }
        containers.remove(name);
        self.removed.lock().await.push((name.to_string(), force));
        Ok(())
    }

    async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<RuntimeContainerView, OrchestratorError> {
        self.check(FakeOp::Inspect, name).await?;
        let containers = self.containers.lock().await;
        let container = containers
            .get(name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))?;
        Ok(RuntimeContainerView {
            name: name.to_string(),
            running: container.running,
            status: if container.running { "running" } else { "exited" }.to_string(),
            image_ref: container.image.clone(),
        })
    }

    async fn list_containers(
        &self,
        all: bool,
    ) -> Result<Vec<RuntimeContainerSummary>, OrchestratorError> {
        self.check(FakeOp::List, "").await?;
        Ok(self
            .containers
            .lock()
            .await
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(name, c)| RuntimeContainerSummary {
                id: c.id.clone(),
                names: vec![name.clone()],
                image: c.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }
}
