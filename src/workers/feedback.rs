use crate::config::FeedbackConfig;
use crate::domain::gateway::Environment;
use crate::services::FeedbackReconciler;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

#[derive(Debug)]
pub struct FeedbackWorker {
    reconciler: Arc<FeedbackReconciler>,
    environment: Environment,
    interval_secs: u64,
    timeout: Duration,
}

impl FeedbackWorker {
    #[must_use]
    pub fn new(reconciler: Arc<FeedbackReconciler>, environment: Environment, config: &FeedbackConfig) -> Self {
        Self { reconciler, environment, interval_secs: config.interval_secs, timeout: config.timeout() }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        if self.interval_secs == 0 {
            tracing::info!("Feedback reconciliation is disabled (interval = 0)");
            return;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once()
                        .instrument(tracing::info_span!("feedback_iteration", environment = %self.environment))
                        .await;
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Feedback worker shutting down...");
    }

    /// One reconciliation pass. Failures are logged and left for the next tick.
    pub async fn run_once(&self) {
        match self.reconciler.reconcile(self.environment, self.timeout).await {
            Ok(report) => {
                if let Err(e) = report.check() {
                    tracing::warn!(error = %e, deleted = report.deleted.len(), "Reconciliation aborted, will retry next cycle");
                } else {
                    tracing::debug!(
                        examined = report.examined,
                        deleted = report.deleted.len(),
                        retained = report.retained.len(),
                        "Reconciliation finished"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Can't connect to feedback service, will retry next cycle"),
        }
    }
}
