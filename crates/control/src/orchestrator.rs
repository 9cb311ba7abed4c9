use crate::lifecycle::ContainerManager;
use crate::store::RecordStore;
use microhost_metrics::{PrometheusMetrics, TracingService};
use microhost_models::{
    container_name_from_image, normalize_image_ref, validate_name, BuildImageResponse,
    BuildRequest, ContainerRecord, ContainerResponse, CreateContainerRequest, HistoryResponse,
    ListContainersResponse, OrchestratorError, StatusTransition, TransitionAction,
    TransitionOutcome,
};
use microhost_packaging::ImageBuilder;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// User-facing operations. Each mutation runs against the runtime first and
/// is persisted only once the runtime has accepted it; a store failure after
/// that point is reported but never undone, the reconciler absorbs the drift.
pub struct Orchestrator {
    manager: Arc<ContainerManager>,
    builder: Arc<ImageBuilder>,
    store: Arc<dyn RecordStore>,
    metrics: Arc<PrometheusMetrics>,
}

impl Orchestrator {
    pub fn new(
        manager: Arc<ContainerManager>,
        builder: Arc<ImageBuilder>,
        store: Arc<dyn RecordStore>,
        metrics: Arc<PrometheusMetrics>,
    ) -> Self {
        Self {
            manager,
            builder,
            store,
            metrics,
        }
    }

    pub fn manager(&self) -> &Arc<ContainerManager> {
        &self.manager
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<PrometheusMetrics> {
        &self.metrics
    }

    async fn owned_record(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ContainerRecord, OrchestratorError> {
        validate_name(name)?;
        self.store
            .find(user_id, name)
            .await?
            .ok_or_else(|| OrchestratorError::container_not_found(name))
    }

    /// History write failures never fail the operation.
    async fn audit(
        &self,
        user_id: &str,
        name: &str,
        action: TransitionAction,
        previous: Option<bool>,
        next: Option<bool>,
        outcome: TransitionOutcome,
    ) {
        let transition = StatusTransition::new(user_id, name, action, previous, next, outcome);
        TracingService::log_transition(&transition);
        if let Err(e) = self.store.record_transition(&transition).await {
            warn!("Failed to record {} transition for {}: {}", action, name, e);
        }
    }

    async fn finish<T>(
        &self,
        user_id: &str,
        name: &str,
        action: TransitionAction,
        previous: Option<bool>,
        next: Option<bool>,
        result: Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        self.metrics
            .record_operation(action.as_str(), result.is_ok());
        let next = if result.is_ok() { next } else { previous };
        self.audit(
            user_id,
            name,
            action,
            previous,
            next,
            TransitionOutcome::from_result(&result),
        )
        .await;
        result
    }

    #[instrument(skip(self, request), fields(image = %request.image))]
    pub async fn create_container(
        &self,
        user_id: &str,
        request: CreateContainerRequest,
    ) -> Result<ContainerResponse, OrchestratorError> {
        let image_ref = normalize_image_ref(&request.image)?;
        let name = match request.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => container_name_from_image(&image_ref)?,
        };

        // Ownership is read under the name lock so two creates for the same
        // name cannot both pass it.
        let guard = self.manager.lock(&name).await;
        let owners = self.store.find_by_name(&name).await?;
        if owners.iter().any(|r| r.user_id != user_id) {
            return Err(OrchestratorError::conflict(format!(
                "container name {name} is owned by another user"
            )));
        }
        let previous = owners
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.desired_running);

        let result = async {
            // Only a container the caller already owns may be replaced.
            self.manager
                .create_guarded(&guard, &image_ref, previous.is_some())
                .await?;

            let record = ContainerRecord::new(user_id, &name, Some(image_ref.clone()), true);
            match self.store.save(&record).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_conflict() => {
                    self.store
                        .update_desired_state(user_id, &name, true)
                        .await?;
                    self.store.update_image_ref(user_id, &name, &image_ref).await
                }
                Err(e) => Err(e),
            }
        }
        .await;

        let result = self
            .finish(
                user_id,
                &name,
                TransitionAction::Create,
                previous,
                Some(true),
                result,
            )
            .await;
        drop(guard);
        result?;

        info!("User {} created container {} from {}", user_id, name, image_ref);
        Ok(ContainerResponse {
            name,
            image: Some(image_ref),
            running: true,
        })
    }

    #[instrument(skip(self))]
    pub async fn start_container(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ContainerResponse, OrchestratorError> {
        let record = self.owned_record(user_id, name).await?;
        let guard = self.manager.lock(name).await;

        let result = async {
            self.manager.start_guarded(&guard).await?;
            self.store.update_desired_state(user_id, name, true).await
        }
        .await;

        self.finish(
            user_id,
            name,
            TransitionAction::Start,
            Some(record.desired_running),
            Some(true),
            result,
        )
        .await?;

        Ok(ContainerResponse {
            name: name.to_string(),
            image: record.image_ref,
            running: true,
        })
    }

    #[instrument(skip(self))]
    pub async fn stop_container(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ContainerResponse, OrchestratorError> {
        let record = self.owned_record(user_id, name).await?;
        let guard = self.manager.lock(name).await;

        let result = async {
            self.manager.stop_guarded(&guard).await?;
            self.store.update_desired_state(user_id, name, false).await
        }
        .await;

        self.finish(
            user_id,
            name,
            TransitionAction::Stop,
            Some(record.desired_running),
            Some(false),
            result,
        )
        .await?;

        Ok(ContainerResponse {
            name: name.to_string(),
            image: record.image_ref,
            running: false,
        })
    }

    /// A container already gone from the runtime still has its record removed.
    #[instrument(skip(self))]
    pub async fn remove_container(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ContainerResponse, OrchestratorError> {
        let record = self.owned_record(user_id, name).await?;
        let guard = self.manager.lock(name).await;

        let result = async {
            match self.manager.stop_and_remove_guarded(&guard).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!("Container {} already absent from the runtime", name);
                }
                Err(e) => return Err(e),
            }
            self.store.delete(user_id, name).await
        }
        .await;

        self.finish(
            user_id,
            name,
            TransitionAction::Remove,
            Some(record.desired_running),
            None,
            result,
        )
        .await?;

        Ok(ContainerResponse {
            name: name.to_string(),
            image: record.image_ref,
            running: false,
        })
    }

    /// Record plus observed state. A missing runtime container reads as not running.
    pub async fn container_status(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<ContainerResponse, OrchestratorError> {
        let record = self.owned_record(user_id, name).await?;
        let running = match self.manager.is_running(name).await {
            Ok(running) => running,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };

        Ok(ContainerResponse {
            name: record.container_name,
            image: record.image_ref,
            running,
        })
    }

    #[instrument(skip(self, request), fields(service = %request.service_name))]
    pub async fn build_image(
        &self,
        user_id: &str,
        request: BuildRequest,
    ) -> Result<BuildImageResponse, OrchestratorError> {
        let started = Instant::now();
        let result = self.builder.build(request).await;
        self.metrics
            .record_build(result.is_ok(), started.elapsed().as_secs_f64());

        let image = result?;
        info!("User {} built image {}", user_id, image);
        Ok(BuildImageResponse { image })
    }

    pub async fn list_containers(
        &self,
        user_id: &str,
    ) -> Result<ListContainersResponse, OrchestratorError> {
        let containers = self.store.list_by_user(user_id).await?;
        Ok(ListContainersResponse {
            count: containers.len(),
            containers,
        })
    }

    /// Entries survive removal of the record, so ownership is judged from the
    /// caller's own entries.
    pub async fn container_history(
        &self,
        user_id: &str,
        name: &str,
        limit: u32,
    ) -> Result<HistoryResponse, OrchestratorError> {
        validate_name(name)?;
        let entries = self
            .store
            .history_for_user_container(user_id, name, limit)
            .await?;

        if entries.is_empty() && self.store.find(user_id, name).await?.is_none() {
            return Err(OrchestratorError::container_not_found(name));
        }

        Ok(HistoryResponse {
            count: entries.len(),
            entries,
        })
    }
}
