use crate::OrchestratorError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location probed when no `--config` path is given.
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";

/// Prefix for environment overrides, e.g. `MICROHOST_RECONCILE__INTERVAL_SECS=30`.
pub const ENV_PREFIX: &str = "MICROHOST_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub runtime: RuntimeConfig,
    pub build: BuildConfig,
    pub reconcile: ReconcileConfig,
    pub history: HistoryConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_request_body_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub db_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Empty means DOCKER_HOST or the local socket.
    pub docker_host: String,
    /// Network shared with the reverse proxy.
    pub network: String,
    /// Port the workload listens on inside the container.
    pub service_port: u16,
    pub stop_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Environment variable carrying the container name into the workload.
    pub env_name_var: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub workspace_dir: String,
    pub max_workspace_age_secs: u64,
    pub max_workspaces: usize,
    pub max_upload_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    pub recreate_missing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    pub max_entries_per_container: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub verify_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// EnvFilter directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "0.0.0.0".to_string(),
                port: 8080,
                max_request_body_size_mb: 20,
            },
            data: DataConfig {
                db_url: "sqlite://data/microhost.db".to_string(),
            },
            runtime: RuntimeConfig {
                docker_host: "".to_string(),
                network: "backend-network".to_string(),
                service_port: 8000,
                stop_timeout_secs: 10,
                connect_timeout_secs: 10,
                env_name_var: "MICROSERVICIO_NAME".to_string(),
            },
            build: BuildConfig {
                workspace_dir: "workspace".to_string(),
                max_workspace_age_secs: 7 * 24 * 60 * 60,
                max_workspaces: 100,
                max_upload_mb: 20,
            },
            reconcile: ReconcileConfig {
                interval_secs: 60,
                recreate_missing: false,
            },
            history: HistoryConfig {
                max_entries_per_container: 200,
            },
            auth: AuthConfig {
                verify_url: "http://localhost:4000/auth/verify-token".to_string(),
                timeout_ms: 5000,
            },
            logging: LoggingConfig {
                format: LogFormat::Text,
                level: "info".to_string(),
            },
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if it exists), then `MICROHOST_*` variables.
    pub fn figment(path: Option<&Path>) -> Figment {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, OrchestratorError> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(OrchestratorError::Config {
                    reason: format!("config file not found: {}", p.display()),
                });
            }
        }
        let config: Config =
            Self::figment(path)
                .extract()
                .map_err(|e| OrchestratorError::Config {
                    reason: e.to_string(),
                })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let fail = |reason: &str| {
            Err(OrchestratorError::Config {
                reason: reason.to_string(),
            })
        };
        if self.server.port == 0 {
            return fail("server.port must be non-zero");
        }
        if self.runtime.service_port == 0 {
            return fail("runtime.service_port must be non-zero");
        }
        if self.runtime.network.trim().is_empty() {
            return fail("runtime.network must not be empty");
        }
        if self.runtime.env_name_var.trim().is_empty() {
            return fail("runtime.env_name_var must not be empty");
        }
        if self.reconcile.interval_secs == 0 {
            return fail("reconcile.interval_secs must be non-zero");
        }
        if self.history.max_entries_per_container == 0 {
            return fail("history.max_entries_per_container must be non-zero");
        }
        if self.build.workspace_dir.trim().is_empty() {
            return fail("build.workspace_dir must not be empty");
        }
        if self.build.max_workspaces == 0 {
            return fail("build.max_workspaces must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconcile.interval_secs, 60);
        assert!(!config.reconcile.recreate_missing);
        assert_eq!(config.runtime.service_port, 8000);
    }

    #[test]
    fn toml_and_env_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "micro.toml",
                r#"
                [reconcile]
                interval_secs = 15
                recreate_missing = true

                [runtime]
                network = "proxy-net"
                "#,
            )?;
            jail.set_env("MICROHOST_SERVER__PORT", "9090");

            let config = Config::load(Some(Path::new("micro.toml"))).expect("config loads");
            assert_eq!(config.reconcile.interval_secs, 15);
            assert!(config.reconcile.recreate_missing);
            assert_eq!(config.runtime.network, "proxy-net");
            assert_eq!(config.server.port, 9090);
            // untouched sections keep their defaults
            assert_eq!(config.history.max_entries_per_container, 200);
            Ok(())
        });
    }

    #[test]
    fn unknown_keys_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[reconcile]\ninterval = 5\n")?;
            let err = Config::load(Some(Path::new("bad.toml"))).unwrap_err();
            assert!(matches!(err, OrchestratorError::Config { .. }));
            Ok(())
        });
    }

    #[test]
    fn zero_interval_fails_validation() {
        let mut config = Config::default();
        config.reconcile.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config { .. }));
    }
}
