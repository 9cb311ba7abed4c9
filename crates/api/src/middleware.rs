use crate::auth::{extract_token, AuthUser};
use crate::handlers::api_error;
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
};
use microhost_models::{ErrorShape, OrchestratorError};
use tracing::debug;

/// Resolves the caller before any handler runs. Missing credential is 401,
/// a rejected one is 403.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorShape>)> {
    let token = extract_token(request.headers(), request.uri().query()).ok_or_else(|| {
        api_error(OrchestratorError::Unauthorized {
            reason: "missing bearer token".to_string(),
        })
    })?;

    let user_id = state.verifier.verify(&token).await.map_err(|e| {
        debug!("Rejected credential for {}: {}", request.uri().path(), e);
        api_error(e)
    })?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
