use microhost::{assemble, open_store};
use microhost_models::{BuildRequest, Config, CreateContainerRequest, SourceFile};
use microhost_testsupport::FakeRuntime;
use std::path::Path;
use tempfile::TempDir;

const USER: &str = "user-1";

fn config_in(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data.db_url = format!("sqlite://{}/state/microhost.db", dir.path().display());
    config.build.workspace_dir = dir.path().join("workspace").to_string_lossy().to_string();
    config
}

fn build_request(name: &str) -> BuildRequest {
    BuildRequest {
        service_name: name.to_string(),
        files: vec![SourceFile::new(
            "app.py",
            "def microservicio(event):\n    return {'ok': True}\n",
        )],
        dockerfile: None,
    }
}

fn create_request(image: &str) -> CreateContainerRequest {
    CreateContainerRequest {
        image: image.to_string(),
        name: None,
    }
}

#[tokio::test]
async fn desired_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let runtime = FakeRuntime::shared();

    {
        let store = open_store(&config).await.unwrap();
        let services = assemble(&config, runtime.clone(), store).unwrap();
        let orchestrator = &services.orchestrator;

        for name in ["svc1", "svc2"] {
            let built = orchestrator.build_image(USER, build_request(name)).await.unwrap();
            assert_eq!(built.image, format!("{name}:latest"));
            orchestrator
                .create_container(USER, create_request(name))
                .await
                .unwrap();
        }
        orchestrator.stop_container(USER, "svc2").await.unwrap();
    }

    // Daemon restart: every container is down, none of them removed.
    runtime.kill("svc1").await;
    assert!(!runtime.is_running("svc1").await);
    let starts_before = runtime.start_count().await;

    let store = open_store(&config).await.unwrap();
    let services = assemble(&config, runtime.clone(), store).unwrap();

    let summary = services.reconciler.run_cycle().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.started, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert!(runtime.is_running("svc1").await);
    assert!(!runtime.is_running("svc2").await);
    assert_eq!(runtime.start_count().await, starts_before + 1);

    let summary = services.reconciler.run_cycle().await.unwrap();
    assert_eq!(summary.started, 0);
    assert_eq!(runtime.start_count().await, starts_before + 1);

    let listed = services.orchestrator.list_containers(USER).await.unwrap();
    assert_eq!(listed.count, 2);
}

#[tokio::test]
async fn store_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    open_store(&config).await.unwrap();
    assert!(dir.path().join("state").join("microhost.db").exists());
}

#[test]
fn bundled_config_loads() {
    let config = Config::load(Some(Path::new("configs/default.toml"))).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.runtime.env_name_var, "MICROSERVICIO_NAME");
    assert!(!config.reconcile.recreate_missing);
}
