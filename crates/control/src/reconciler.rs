use crate::lifecycle::ContainerManager;
use crate::store::RecordStore;
use microhost_metrics::{PrometheusMetrics, TracingService};
use microhost_models::{
    ContainerRecord, OrchestratorError, ReconcileConfig, StatusTransition, TransitionAction,
    TransitionOutcome,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub total: usize,
    pub started: usize,
    pub skipped: usize,
    pub failed: usize,
    pub recreated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Started,
    Recreated,
    Skipped,
    Failed,
}

/// Brings observed runtime state in line with persisted desired state.
pub struct Reconciler {
    manager: Arc<ContainerManager>,
    store: Arc<dyn RecordStore>,
    metrics: Arc<PrometheusMetrics>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        manager: Arc<ContainerManager>,
        store: Arc<dyn RecordStore>,
        metrics: Arc<PrometheusMetrics>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            manager,
            store,
            metrics,
            config,
        }
    }

    /// Runs one cycle per interval until `cancel` fires. A cycle in progress is
    /// allowed to finish its current record; cycles never overlap.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Starting reconciler with interval {}s (recreate_missing: {})",
            self.config.interval_secs, self.config.recreate_missing
        );

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_cycle_until(&cancel).await {
                error!("Reconciliation cycle failed: {}", e);
            }
            self.manager.locks().prune_idle();
        }

        info!("Reconciler stopped");
    }

    pub async fn run_cycle(&self) -> Result<ReconcileSummary, OrchestratorError> {
        self.run_cycle_until(&CancellationToken::new()).await
    }

    /// Records are processed one at a time; cancellation is checked between them.
    pub async fn run_cycle_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconcileSummary, OrchestratorError> {
        let started_at = Instant::now();
        let records = self.store.list_all().await?;
        let mut summary = ReconcileSummary {
            total: records.len(),
            ..Default::default()
        };

        for record in &records {
            if cancel.is_cancelled() {
                warn!("Reconciliation interrupted by shutdown");
                break;
            }
            match self.reconcile_record(record).await {
                RecordOutcome::Started => summary.started += 1,
                RecordOutcome::Recreated => summary.recreated += 1,
                RecordOutcome::Skipped => summary.skipped += 1,
                RecordOutcome::Failed => summary.failed += 1,
            }
        }

        TracingService::log_reconcile_summary(
            summary.total,
            summary.started + summary.recreated,
            summary.skipped,
            summary.failed,
        );
        self.metrics.record_reconcile_cycle(
            summary.started + summary.recreated,
            summary.failed,
            started_at.elapsed().as_secs_f64(),
        );
        Ok(summary)
    }

    async fn reconcile_record(&self, record: &ContainerRecord) -> RecordOutcome {
        if !record.desired_running {
            return RecordOutcome::Skipped;
        }

        let name = record.container_name.as_str();
        let guard = self.manager.lock(name).await;

        match self.manager.is_running(name).await {
            Ok(true) => RecordOutcome::Skipped,
            Ok(false) => {
                let result = self.manager.start_guarded(&guard).await;
                match &result {
                    Ok(()) => info!("Reconciler started {}", name),
                    Err(e) => warn!("Reconciler could not start {}: {}", name, e),
                }
                let outcome = if result.is_ok() {
                    RecordOutcome::Started
                } else {
                    RecordOutcome::Failed
                };
                self.audit(record, TransitionOutcome::from_result(&result))
                    .await;
                outcome
            }
            Err(e) if e.is_not_found() && self.config.recreate_missing => {
                let Some(image_ref) = record.image_ref.as_deref() else {
                    warn!("Container {} is missing and has no image to recreate from", name);
                    return RecordOutcome::Failed;
                };
                let result = self.manager.create_guarded(&guard, image_ref, true).await;
                match &result {
                    Ok(()) => info!("Reconciler recreated {} from {}", name, image_ref),
                    Err(e) => warn!("Reconciler could not recreate {}: {}", name, e),
                }
                let outcome = if result.is_ok() {
                    RecordOutcome::Recreated
                } else {
                    RecordOutcome::Failed
                };
                self.audit(record, TransitionOutcome::from_result(&result))
                    .await;
                outcome
            }
            Err(e) => {
                warn!("Reconciler could not inspect {}: {}", name, e);
                RecordOutcome::Failed
            }
        }
    }

    async fn audit(&self, record: &ContainerRecord, outcome: TransitionOutcome) {
        let transition = StatusTransition::new(
            record.user_id.clone(),
            record.container_name.clone(),
            TransitionAction::Reconcile,
            Some(record.desired_running),
            Some(record.desired_running),
            outcome,
        );
        TracingService::log_transition(&transition);
        if let Err(e) = self.store.record_transition(&transition).await {
            warn!(
                "Failed to record reconcile transition for {}: {}",
                record.container_name, e
            );
        }
    }
}
