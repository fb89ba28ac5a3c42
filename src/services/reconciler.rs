use crate::adapters::credentials::CredentialStore;
use crate::domain::gateway::{Environment, Purpose};
use crate::domain::registration::{Invalidation, ReconcileStatus, ReconciliationReport, StoreFailure};
use crate::error::{Result, TransportError};
use crate::services::pool::{ConnectionPool, DEFAULT_ACQUIRE_TIMEOUT};
use futures::StreamExt;
use opentelemetry::{global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
struct Metrics {
    invalidations: Counter<u64>,
    deleted: Counter<u64>,
    retained: Counter<u64>,
    query_failures: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("apns-relay");
        Self {
            invalidations: meter
                .u64_counter("feedback_invalidations_total")
                .with_description("Total number of invalidation reports read from the feedback service")
                .build(),
            deleted: meter
                .u64_counter("feedback_registrations_deleted_total")
                .with_description("Total number of device registrations deleted after invalidation")
                .build(),
            retained: meter
                .u64_counter("feedback_registrations_retained_total")
                .with_description("Total number of registrations kept because they were refreshed after invalidation")
                .build(),
            query_failures: meter
                .u64_counter("feedback_query_failures_total")
                .with_description("Total number of aborted feedback reads")
                .build(),
        }
    }
}

/// Applies the gateway's invalidation reports to the credential store. This is the only
/// place registrations are deleted because the gateway stopped accepting a token.
#[derive(Debug)]
pub struct FeedbackReconciler {
    pool: Arc<ConnectionPool>,
    store: Arc<dyn CredentialStore>,
    acquire_timeout: Duration,
    metrics: Metrics,
}

impl FeedbackReconciler {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, store: Arc<dyn CredentialStore>) -> Self {
        Self { pool, store, acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT, metrics: Metrics::new() }
    }

    /// Bounds how long `reconcile` waits for a feedback connection.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Reads pending invalidations and deletes every registration that was not refreshed after
    /// its token was invalidated. Pairs are handled in the order the gateway sends them.
    ///
    /// `timeout` bounds each read from the feedback stream, not the whole run: a gateway that
    /// keeps producing pairs keeps the run going. Waiting for the connection is bounded by the
    /// reconciler's acquire timeout.
    ///
    /// A failed or timed-out feedback read stops the run: deletions made so far stay, the rest
    /// is left for the next run, and the report's status is `QueryFailed`.
    ///
    /// # Errors
    /// Returns `AppError::TransportUnavailable` if no feedback connection can be acquired.
    #[tracing::instrument(skip(self), fields(examined = tracing::field::Empty, deleted = tracing::field::Empty))]
    pub async fn reconcile(&self, environment: Environment, timeout: Duration) -> Result<ReconciliationReport> {
        let conn = self.pool.acquire(environment, Purpose::Feedback, self.acquire_timeout).await?;
        let mut report = ReconciliationReport::new(environment);

        let failure = {
            let mut invalidations = conn.feedback();
            loop {
                let next = match tokio::time::timeout(timeout, invalidations.next()).await {
                    Ok(next) => next,
                    Err(_) => break Some(TransportError::TimedOut),
                };

                match next {
                    Some(Ok(invalidation)) => self.apply(&invalidation, &mut report).await,
                    Some(Err(e)) => break Some(e),
                    None => break None,
                }
            }
        };

        if let Some(e) = failure {
            tracing::warn!(error = %e, processed = report.examined, "Feedback query failed, aborting reconciliation");
            self.metrics.query_failures.add(1, &[]);
            report.status = ReconcileStatus::QueryFailed { reason: e.to_string() };
            self.pool.discard(conn);
        }

        let span = tracing::Span::current();
        span.record("examined", report.examined);
        span.record("deleted", report.deleted.len());
        if !report.deleted.is_empty() {
            tracing::info!(count = report.deleted.len(), "Deleted invalidated device registrations");
        }

        Ok(report)
    }

    async fn apply(&self, invalidation: &Invalidation, report: &mut ReconciliationReport) {
        report.examined += 1;
        self.metrics.invalidations.add(1, &[]);
        let token = &invalidation.token;

        let registration = match self.store.find_by_identifier(token).await {
            Ok(registration) => registration,
            Err(e) => {
                tracing::error!(error = %e, token = %token, "Failed to look up registration");
                report.store_errors.push(StoreFailure { token: token.clone(), message: e.to_string() });
                return;
            }
        };

        match registration {
            None => {
                tracing::debug!(token = %token, "Invalidated token is not registered");
                report.absent.push(token.clone());
            }
            Some(registration) if registration.is_invalidated_by(invalidation) => {
                match self.store.delete(token).await {
                    Ok(_) => {
                        tracing::debug!(token = %token, user.id = %registration.user_id, "Deleted invalidated registration");
                        self.metrics.deleted.add(1, &[]);
                        report.deleted.push(token.clone());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, token = %token, "Failed to delete invalidated registration");
                        report.store_errors.push(StoreFailure { token: token.clone(), message: e.to_string() });
                    }
                }
            }
            Some(_) => {
                tracing::debug!(token = %token, "Registration refreshed after invalidation, keeping it");
                self.metrics.retained.add(1, &[]);
                report.retained.push(token.clone());
            }
        }
    }
}
