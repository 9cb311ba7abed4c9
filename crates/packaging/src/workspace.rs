use microhost_models::{BuildConfig, OrchestratorError, SourceFile};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, instrument, warn};

fn io_err(e: std::io::Error) -> OrchestratorError {
    OrchestratorError::internal(e.to_string())
}

/// Rejects absolute paths, `..` and anything that would escape the workspace.
pub fn validate_source_path(path: &str) -> Result<(), OrchestratorError> {
    let p = Path::new(path);
    if path.is_empty() || p.components().next().is_none() {
        return Err(OrchestratorError::validation("source file name is empty"));
    }
    if !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(OrchestratorError::validation(format!(
            "invalid source file path '{path}'"
        )));
    }
    Ok(())
}

/// On-disk build contexts, one directory per service name.
#[derive(Clone, Debug)]
pub struct Workspaces {
    root: PathBuf,
    max_age: Duration,
    max_count: usize,
}

impl Workspaces {
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            root: PathBuf::from(&config.workspace_dir),
            max_age: Duration::from_secs(config.max_workspace_age_secs),
            max_count: config.max_workspaces,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, service_name: &str) -> PathBuf {
        self.root.join(service_name)
    }

    /// Replaces any leftover directory for `service_name` with the given files.
    pub async fn materialize(
        &self,
        service_name: &str,
        files: &[SourceFile],
        extra: &[(&str, Vec<u8>)],
    ) -> Result<PathBuf, OrchestratorError> {
        let dir = self.path_for(service_name);
        if tokio::fs::try_exists(&dir).await.map_err(io_err)? {
            tokio::fs::remove_dir_all(&dir).await.map_err(io_err)?;
        }
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;

        for file in files {
            let dest = dir.join(&file.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            tokio::fs::write(&dest, &file.contents)
                .await
                .map_err(io_err)?;
        }
        for (name, contents) in extra {
            tokio::fs::write(dir.join(name), contents)
                .await
                .map_err(io_err)?;
        }

        Ok(dir)
    }

    /// Tars `dir` into an in-memory build context.
    pub async fn archive(&self, dir: &Path) -> Result<Vec<u8>, OrchestratorError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut builder = tar::Builder::new(Vec::new());
            builder.follow_symlinks(false);
            builder.append_dir_all(".", &dir)?;
            builder.into_inner()
        })
        .await
        .map_err(|e| OrchestratorError::internal(format!("archive task failed: {e}")))?
        .map_err(|e| OrchestratorError::internal(format!("failed to archive build context: {e}")))
    }

    /// Deletes workspaces older than the age limit, then the oldest beyond the
    /// count limit. `keep` is never deleted.
    pub async fn prune(&self, keep: &Path) -> Result<usize, OrchestratorError> {
        let this = self.clone();
        let keep = keep.to_path_buf();
        tokio::task::spawn_blocking(move || this.prune_blocking(&keep))
            .await
            .map_err(|e| OrchestratorError::internal(format!("prune task failed: {e}")))?
    }

    #[instrument(skip(self))]
    fn prune_blocking(&self, keep: &Path) -> Result<usize, OrchestratorError> {
        if !self.root.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut survivors: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut removed_count = 0;

        for entry in fs::read_dir(&self.root).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let metadata = entry.metadata().map_err(io_err)?;
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(now);
            if path == keep {
                continue;
            }

            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.max_age {
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed_count += 1,
                    Err(e) => warn!("failed to remove workspace {}: {}", path.display(), e),
                }
            } else {
                survivors.push((modified, path));
            }
        }

        // `keep` occupies one slot
        let allowed = self.max_count.saturating_sub(1);
        if survivors.len() > allowed {
            survivors.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
            for (_, path) in survivors.drain(allowed..) {
                match fs::remove_dir_all(&path) {
                    Ok(()) => removed_count += 1,
                    Err(e) => warn!("failed to remove workspace {}: {}", path.display(), e),
                }
            }
        }

        if removed_count > 0 {
            info!("Pruned {} old build workspaces", removed_count);
        }
        Ok(removed_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn workspaces(root: &Path, max_age_secs: u64, max_count: usize) -> Workspaces {
        Workspaces::new(&BuildConfig {
            workspace_dir: root.to_string_lossy().to_string(),
            max_workspace_age_secs: max_age_secs,
            max_workspaces: max_count,
            max_upload_mb: 20,
        })
    }

    #[test]
    fn source_paths_cannot_escape() {
        assert!(validate_source_path("app.py").is_ok());
        assert!(validate_source_path("lib/util.py").is_ok());
        assert!(validate_source_path("").is_err());
        assert!(validate_source_path("../etc/passwd").is_err());
        assert!(validate_source_path("/etc/passwd").is_err());
        assert!(validate_source_path("lib/../../x").is_err());
        assert!(validate_source_path("./app.py").is_err());
    }

    #[tokio::test]
    async fn materialize_writes_nested_files() {
        let tmp = tempdir().unwrap();
        let ws = workspaces(tmp.path(), 3600, 10);
        let files = vec![
            SourceFile::new("app.py", "def microservicio(r): return r"),
            SourceFile::new("lib/util.py", "X = 1"),
        ];

        let dir = ws
            .materialize("svc1", &files, &[("Dockerfile", b"FROM scratch".to_vec())])
            .await
            .unwrap();

        assert_eq!(dir, tmp.path().join("svc1"));
        assert_eq!(std::fs::read_to_string(dir.join("lib/util.py")).unwrap(), "X = 1");
        assert!(dir.join("Dockerfile").exists());

        let archive = ws.archive(&dir).await.unwrap();
        assert!(!archive.is_empty());
    }

    #[tokio::test]
    async fn prune_by_age_spares_current() {
        let tmp = tempdir().unwrap();
        let ws = workspaces(tmp.path(), 0, 10);
        for name in ["old1", "old2", "current"] {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let removed = ws.prune(&tmp.path().join("current")).await.unwrap();
        assert_eq!(removed, 2);
        assert!(tmp.path().join("current").exists());
        assert!(!tmp.path().join("old1").exists());
    }

    #[tokio::test]
    async fn prune_by_count_keeps_newest() {
        let tmp = tempdir().unwrap();
        let ws = workspaces(tmp.path(), 3600, 2);
        for name in ["a", "b", "c"] {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // "a" is the oldest but is the one being kept
        let removed = ws.prune(&tmp.path().join("a")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(tmp.path().join("a").exists());
        assert!(tmp.path().join("c").exists());
        assert!(!tmp.path().join("b").exists());
    }
}
