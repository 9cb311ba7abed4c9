pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use auth::*;
pub use handlers::*;
pub use middleware::*;
pub use routes::*;
pub use state::*;

use axum::Router;
use microhost_models::OrchestratorError;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Router plus the tracing and CORS layers.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serves until `shutdown` fires; in-flight requests are drained.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::internal(format!("failed to bind {addr}: {e}")))?;
    info!("microhost API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| OrchestratorError::internal(format!("server error: {e}")))?;

    info!("microhost API stopped");
    Ok(())
}
