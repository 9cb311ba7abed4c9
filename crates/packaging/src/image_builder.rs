use crate::templates;
use crate::workspace::{validate_source_path, Workspaces};
use microhost_models::{build_tag, validate_name, BuildConfig, BuildRequest, OrchestratorError};
use microhost_runtime::{ContainerRuntime, NameLocks};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Builds `<service>:latest` images from uploaded source bundles.
pub struct ImageBuilder {
    runtime: Arc<dyn ContainerRuntime>,
    locks: NameLocks,
    workspaces: Workspaces,
}

/// `registry:5000/svc1:latest` -> `registry:5000/svc1`.
fn repository_of(tag: &str) -> &str {
    let last_slash = tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match tag[last_slash..].rfind(':') {
        Some(colon) => &tag[..last_slash + colon],
        None => tag,
    }
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, locks: NameLocks, config: &BuildConfig) -> Self {
        Self {
            runtime,
            locks,
            workspaces: Workspaces::new(config),
        }
    }

    pub fn workspaces(&self) -> &Workspaces {
        &self.workspaces
    }

    /// Fails with Conflict when `service_name` is already taken by an image
    /// repository or a container. Runs before anything touches the disk.
    pub async fn ensure_name_available(&self, service_name: &str) -> Result<(), OrchestratorError> {
        let images = self.runtime.list_images().await?;
        let image_taken = images
            .iter()
            .flat_map(|image| image.repo_tags.iter())
            .any(|tag| repository_of(tag) == service_name);
        if image_taken {
            return Err(OrchestratorError::conflict(format!(
                "an image named {service_name} already exists"
            )));
        }

        let containers = self.runtime.list_containers(true).await?;
        if containers
            .iter()
            .any(|c| c.names.iter().any(|n| n == service_name))
        {
            return Err(OrchestratorError::conflict(format!(
                "a container named {service_name} already exists"
            )));
        }
        Ok(())
    }

    /// A bundled `Dockerfile` counts as an override when none was sent separately.
    fn normalize(mut request: BuildRequest) -> BuildRequest {
        if let Some(pos) = request
            .files
            .iter()
            .position(|f| f.path == templates::DOCKERFILE)
        {
            let bundled = request.files.remove(pos);
            if request.dockerfile.is_none() {
                request.dockerfile = Some(bundled.contents);
            }
        }
        request
    }

    fn validate(request: &BuildRequest) -> Result<(), OrchestratorError> {
        validate_name(&request.service_name)?;
        if request.files.is_empty() {
            return Err(OrchestratorError::validation("at least one source file is required"));
        }
        for file in &request.files {
            validate_source_path(&file.path)?;
        }
        if request.dockerfile.is_none() {
            if !request.files.iter().any(|f| f.path == templates::ENTRYPOINT) {
                return Err(OrchestratorError::validation(format!(
                    "{} is required when no Dockerfile is supplied",
                    templates::ENTRYPOINT
                )));
            }
            // The default template ships its own wrapper under this path.
            if request.files.iter().any(|f| f.path == templates::WRAPPER) {
                return Err(OrchestratorError::validation(format!(
                    "{} is reserved unless a Dockerfile is supplied",
                    templates::WRAPPER
                )));
            }
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(service = %request.service_name, files = request.files.len()))]
    pub async fn build(&self, request: BuildRequest) -> Result<String, OrchestratorError> {
        let request = Self::normalize(request);
        Self::validate(&request)?;
        let _guard = self.locks.lock(&request.service_name).await;

        self.ensure_name_available(&request.service_name).await?;

        // An override replaces both the template Dockerfile and the wrapper.
        let extra = match &request.dockerfile {
            Some(dockerfile) => vec![(templates::DOCKERFILE, dockerfile.clone())],
            None => templates::default_context_files()?,
        };
        let dir = self
            .workspaces
            .materialize(&request.service_name, &request.files, &extra)
            .await?;
        info!("Build context: {}", dir.display());

        let context = self.workspaces.archive(&dir).await?;
        let tag = build_tag(&request.service_name);
        self.runtime
            .build_image(context, &tag, templates::DOCKERFILE)
            .await?;

        if let Err(e) = self.workspaces.prune(&dir).await {
            warn!("workspace retention failed: {}", e);
        }

        info!("Built image {}", tag);
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_strips_tag_only() {
        assert_eq!(repository_of("svc1:latest"), "svc1");
        assert_eq!(repository_of("svc1"), "svc1");
        assert_eq!(repository_of("localhost:5000/svc1:v2"), "localhost:5000/svc1");
        assert_eq!(repository_of("localhost:5000/svc1"), "localhost:5000/svc1");
    }
}
