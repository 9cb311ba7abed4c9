use crate::{handlers::*, middleware::require_auth, AppState};
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};

const MIB: u64 = 1024 * 1024;

pub fn create_router(state: &AppState) -> Router<AppState> {
    let upload_limit = (state.config.build.max_upload_mb * MIB) as usize;
    let body_limit = (state.config.server.max_request_body_size_mb * MIB) as usize;

    let authenticated = Router::new()
        // Lifecycle
        .route("/new/container", post(create_container))
        .route("/remove/container", post(remove_container))
        .route("/stop/container", post(stop_container))
        .route("/start/container", post(start_container))
        // Images
        .route(
            "/new/image",
            post(build_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Queries
        .route("/containers", get(list_containers))
        .route("/containers/:name", get(container_status))
        .route("/containers/:name/history", get(container_history))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(authenticated)
        // Health and metrics
        .route("/healthz", get(health_check))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(body_limit))
}

pub fn build_router(state: AppState) -> Router {
    create_router(&state).with_state(state)
}
