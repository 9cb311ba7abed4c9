use microhost_models::{BuildConfig, BuildRequest, OrchestratorError, SourceFile};
use microhost_packaging::ImageBuilder;
use microhost_runtime::{ContainerRuntime, NameLocks};
use microhost_testsupport::{FakeOp, FakeRuntime};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config(root: &Path) -> BuildConfig {
    BuildConfig {
        workspace_dir: root.to_string_lossy().to_string(),
        max_workspace_age_secs: 3600,
        max_workspaces: 100,
        max_upload_mb: 20,
    }
}

fn app_request(name: &str) -> BuildRequest {
    BuildRequest {
        service_name: name.to_string(),
        files: vec![SourceFile::new(
            "app.py",
            "def microservicio(request):\n    return {'ok': True}\n",
        )],
        dockerfile: None,
    }
}

fn builder(runtime: &Arc<FakeRuntime>, root: &Path) -> ImageBuilder {
    ImageBuilder::new(runtime.clone(), NameLocks::new(), &config(root))
}

#[tokio::test]
async fn build_tags_latest_with_default_template() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let tag = builder.build(app_request("svc1")).await.unwrap();
    assert_eq!(tag, "svc1:latest");

    let build = runtime.last_build().await;
    assert_eq!(build.tag, "svc1:latest");
    assert_eq!(build.dockerfile, "Dockerfile");
    assert!(build.files.contains_key("app.py"));
    assert!(build.files.contains_key("server.py"));
    assert!(build.files.contains_key("Dockerfile"));

    let images = runtime.list_images().await.unwrap();
    assert!(images.iter().any(|i| i.repo_tags.contains(&tag)));

    // workspace is kept for provenance
    assert!(tmp.path().join("svc1").join("app.py").exists());
}

#[tokio::test]
async fn name_collision_fails_before_touching_disk() {
    let runtime = FakeRuntime::shared();
    runtime.add_image("svc1:latest").await;
    runtime.add_container("svc2", "nginx:latest", false).await;
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let err = builder.build(app_request("svc1")).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(!tmp.path().join("svc1").exists());

    let err = builder.build(app_request("svc2")).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(!tmp.path().join("svc2").exists());

    assert!(runtime.builds.lock().await.is_empty());
}

#[tokio::test]
async fn override_dockerfile_skips_wrapper() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let request = BuildRequest {
        service_name: "gosvc".into(),
        files: vec![SourceFile::new("main.go", "package main")],
        dockerfile: Some(b"FROM golang:1.22\nCOPY . .\n".to_vec()),
    };
    builder.build(request).await.unwrap();

    let build = runtime.last_build().await;
    assert_eq!(build.files["Dockerfile"], b"FROM golang:1.22\nCOPY . .\n".to_vec());
    assert!(!build.files.contains_key("server.py"));
}

#[tokio::test]
async fn bundled_dockerfile_is_used_as_override() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let request = BuildRequest {
        service_name: "bundled".into(),
        files: vec![
            SourceFile::new("Dockerfile", "FROM alpine"),
            SourceFile::new("run.sh", "echo hi"),
        ],
        dockerfile: None,
    };
    builder.build(request).await.unwrap();

    let build = runtime.last_build().await;
    assert_eq!(build.files["Dockerfile"], b"FROM alpine".to_vec());
    assert!(!build.files.contains_key("server.py"));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let mut escaping = app_request("svc1");
    escaping.files.push(SourceFile::new("../outside.py", "x"));
    assert!(matches!(
        builder.build(escaping).await,
        Err(OrchestratorError::Validation { .. })
    ));

    let no_entrypoint = BuildRequest {
        service_name: "svc1".into(),
        files: vec![SourceFile::new("other.py", "x")],
        dockerfile: None,
    };
    assert!(matches!(
        builder.build(no_entrypoint).await,
        Err(OrchestratorError::Validation { .. })
    ));

    assert!(matches!(
        builder.build(app_request("Bad Name")).await,
        Err(OrchestratorError::Validation { .. })
    ));
    assert!(!tmp.path().join("svc1").exists());
}

#[tokio::test]
async fn own_wrapper_needs_a_dockerfile() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let mut shadowing = app_request("svc1");
    shadowing
        .files
        .push(SourceFile::new("server.py", "print('mine')\n"));
    let err = builder.build(shadowing.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation { .. }));
    assert!(err.to_string().contains("server.py"));
    assert!(runtime.builds.lock().await.is_empty());
    assert!(!tmp.path().join("svc1").exists());

    shadowing.dockerfile = Some(b"FROM python:3.11-slim\nCMD python server.py\n".to_vec());
    builder.build(shadowing).await.unwrap();
    let build = runtime.last_build().await;
    assert_eq!(build.files["server.py"], b"print('mine')\n".to_vec());
}

#[tokio::test]
async fn engine_failure_is_surfaced_and_nothing_tagged() {
    let runtime = FakeRuntime::shared();
    runtime
        .fail(FakeOp::Build, Some("svc1:latest"), "step 3/5 failed")
        .await;
    let tmp = tempfile::tempdir().unwrap();
    let builder = builder(&runtime, tmp.path());

    let err = builder.build(app_request("svc1")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Runtime { .. }));
    assert!(runtime.list_images().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_builds_of_same_name_yield_one_conflict() {
    let runtime = FakeRuntime::shared();
    runtime.set_build_delay(Duration::from_millis(50)).await;
    let tmp = tempfile::tempdir().unwrap();
    let builder = Arc::new(builder(&runtime, tmp.path()));

    let a = tokio::spawn({
        let builder = builder.clone();
        async move { builder.build(app_request("svc1")).await }
    });
    let b = tokio::spawn({
        let builder = builder.clone();
        async move { builder.build(app_request("svc1")).await }
    });

    let results = [a.await.unwrap(), b.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count(),
        1
    );
}

#[tokio::test]
async fn retention_caps_workspace_count() {
    let runtime = FakeRuntime::shared();
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(tmp.path());
    cfg.max_workspaces = 2;
    let builder = ImageBuilder::new(runtime.clone(), NameLocks::new(), &cfg);

    for name in ["one", "two", "three"] {
        builder.build(app_request(name)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!tmp.path().join("one").exists());
    assert!(tmp.path().join("two").exists());
    assert!(tmp.path().join("three").exists());
}
