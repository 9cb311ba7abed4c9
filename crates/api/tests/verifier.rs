use axum::{http::HeaderMap, http::StatusCode, response::Json, routing::get, Router};
use microhost_api::{HttpTokenVerifier, TokenVerifier};
use microhost_models::{AuthConfig, OrchestratorError};
use serde_json::{json, Value};

async fn verify_token(headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer good") => Ok(Json(json!({ "valid": true, "user": { "sub": "user-9" } }))),
        Some("Bearer invalid") => Ok(Json(json!({ "valid": false, "user": { "sub": "user-9" } }))),
        Some("Bearer garbled") => Ok(Json(json!({ "unexpected": true }))),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn identity_service() -> String {
    let app = Router::new().route("/auth/verify-token", get(verify_token));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/auth/verify-token")
}

fn verifier(verify_url: String) -> HttpTokenVerifier {
    HttpTokenVerifier::new(&AuthConfig {
        verify_url,
        timeout_ms: 2000,
    })
    .unwrap()
}

#[tokio::test]
async fn accepted_token_yields_subject() {
    let verifier = verifier(identity_service().await);
    assert_eq!(verifier.verify("good").await.unwrap(), "user-9");
}

#[tokio::test]
async fn rejected_and_malformed_answers_are_forbidden() {
    let verifier = verifier(identity_service().await);
    for token in ["nope", "invalid", "garbled"] {
        assert!(
            matches!(verifier.verify(token).await, Err(OrchestratorError::Forbidden)),
            "token {token} should be refused"
        );
    }
}

#[tokio::test]
async fn unreachable_service_is_forbidden() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let verifier = verifier(format!("http://{addr}/auth/verify-token"));
    assert!(matches!(
        verifier.verify("good").await,
        Err(OrchestratorError::Forbidden)
    ));
}
