use microhost_models::{LogFormat, LoggingConfig, OrchestratorError, StatusTransition};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), OrchestratorError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| OrchestratorError::Config {
            reason: format!("invalid logging.level '{}': {e}", config.level),
        })?;

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_env_filter(filter)
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::internal(format!("tracing already initialised: {e}")))
}

pub struct TracingService;

impl TracingService {
    pub fn log_transition(transition: &StatusTransition) {
        if transition.outcome.is_success() {
            info!(
                user_id = %transition.user_id,
                container_name = %transition.container_name,
                action = %transition.action,
                previous_desired = ?transition.previous_desired,
                next_desired = ?transition.next_desired,
                "Container transition"
            );
        } else {
            warn!(
                user_id = %transition.user_id,
                container_name = %transition.container_name,
                action = %transition.action,
                outcome = ?transition.outcome,
                "Container transition failed"
            );
        }
    }

    pub fn log_reconcile_summary(total: usize, started: usize, skipped: usize, failed: usize) {
        info!(
            total = total,
            started = started,
            skipped = skipped,
            failed = failed,
            "Reconciliation cycle complete"
        );
    }
}
