use crate::auth::AuthUser;
use crate::AppState;
use axum::{
    extract::{multipart::Field, rejection::JsonRejection, Extension, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use microhost_models::{
    BuildImageResponse, BuildRequest, ContainerNameRequest, ContainerResponse,
    CreateContainerRequest, ErrorShape, HistoryResponse, ListContainersResponse,
    OrchestratorError, SourceFile,
};
use serde::Deserialize;
use tracing::{error, info, instrument};

pub type ApiError = (StatusCode, Json<ErrorShape>);

pub fn api_error(e: OrchestratorError) -> ApiError {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(e.to_error_shape()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| api_error(OrchestratorError::validation(rejection.body_text())))
}

#[instrument(skip(state, payload))]
pub async fn create_container(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    payload: Result<Json<CreateContainerRequest>, JsonRejection>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let request = json_body(payload)?;
    info!("Creating container from image: {}", request.image);

    match state.orchestrator.create_container(&user, request).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Failed to create container: {}", e);
            Err(api_error(e))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn remove_container(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    payload: Result<Json<ContainerNameRequest>, JsonRejection>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let ContainerNameRequest { name } = json_body(payload)?;
    info!("Removing container: {}", name);

    match state.orchestrator.remove_container(&user, &name).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Failed to remove container {}: {}", name, e);
            Err(api_error(e))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn stop_container(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    payload: Result<Json<ContainerNameRequest>, JsonRejection>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let ContainerNameRequest { name } = json_body(payload)?;
    info!("Stopping container: {}", name);

    match state.orchestrator.stop_container(&user, &name).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Failed to stop container {}: {}", name, e);
            Err(api_error(e))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn start_container(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    payload: Result<Json<ContainerNameRequest>, JsonRejection>,
) -> Result<Json<ContainerResponse>, ApiError> {
    let ContainerNameRequest { name } = json_body(payload)?;
    info!("Starting container: {}", name);

    match state.orchestrator.start_container(&user, &name).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Failed to start container {}: {}", name, e);
            Err(api_error(e))
        }
    }
}

async fn field_bytes(field: Field<'_>) -> Result<Vec<u8>, OrchestratorError> {
    field
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| OrchestratorError::validation(format!("unreadable upload: {e}")))
}

/// Form layout: a `name` text field, an optional `dockerfile` part, and one
/// part per source file (its filename is the path in the build context).
async fn read_build_form(mut multipart: Multipart) -> Result<BuildRequest, OrchestratorError> {
    let mut service_name = None;
    let mut dockerfile = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OrchestratorError::validation(format!("malformed multipart body: {e}")))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "name" => {
                let value = field_bytes(field).await?;
                let value = String::from_utf8(value)
                    .map_err(|_| OrchestratorError::validation("name must be UTF-8"))?;
                service_name = Some(value.trim().to_string());
            }
            "dockerfile" => dockerfile = Some(field_bytes(field).await?),
            _ => {
                let path = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| field_name.clone());
                if path.is_empty() {
                    return Err(OrchestratorError::validation("file part without a name"));
                }
                files.push(SourceFile::new(path, field_bytes(field).await?));
            }
        }
    }

    let service_name =
        service_name.ok_or_else(|| OrchestratorError::validation("name field is required"))?;
    Ok(BuildRequest {
        service_name,
        files,
        dockerfile,
    })
}

#[instrument(skip(state, multipart))]
pub async fn build_image(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<Json<BuildImageResponse>, ApiError> {
    let request = read_build_form(multipart).await.map_err(api_error)?;
    info!(
        "Building image {} from {} file(s)",
        request.service_name,
        request.files.len()
    );

    // Builds run on their own task so a dropped connection does not abandon
    // a half-finished build.
    let orchestrator = state.orchestrator.clone();
    let build = tokio::spawn(async move { orchestrator.build_image(&user, request).await });

    match build.await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(e)) => {
            error!("Failed to build image: {}", e);
            Err(api_error(e))
        }
        Err(e) => {
            error!("Build task failed: {}", e);
            Err(api_error(OrchestratorError::internal(format!("build task failed: {e}"))))
        }
    }
}

#[instrument(skip(state))]
pub async fn list_containers(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<ListContainersResponse>, ApiError> {
    state
        .orchestrator
        .list_containers(&user)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Failed to list containers: {}", e);
            api_error(e)
        })
}

#[instrument(skip(state))]
pub async fn container_status(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(name): Path<String>,
) -> Result<Json<ContainerResponse>, ApiError> {
    state
        .orchestrator
        .container_status(&user, &name)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<u32>,
}

#[instrument(skip(state))]
pub async fn container_history(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let max = state.config.history.max_entries_per_container;
    let limit = params.limit.unwrap_or(max).clamp(1, max);

    state
        .orchestrator
        .container_history(&user, &name, limit)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn health_check() -> &'static str {
    "OK"
}

#[instrument(skip(state))]
pub async fn metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    match state.metrics.get_metrics() {
        Ok(metrics) => Ok(metrics),
        Err(e) => {
            error!("Failed to get metrics: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
