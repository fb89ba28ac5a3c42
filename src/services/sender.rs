use crate::domain::gateway::{Environment, Purpose};
use crate::domain::notification::{
    BatchError, DeliveryResult, FailurePolicy, NotificationPayload, RejectionKind, UNKNOWN_ERROR,
};
use crate::error::{AppError, Result, TransportError};
use crate::services::pool::{ConnectionPool, DEFAULT_ACQUIRE_TIMEOUT, PooledConnection};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;

/// Automatic resubmissions per `send` call.
pub const MAX_RETRY_ROUNDS: u32 = 1;

#[derive(Clone, Debug)]
struct Metrics {
    delivered: Counter<u64>,
    rejected: Counter<u64>,
    retries: Counter<u64>,
    transport_errors: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("apns-relay");
        Self {
            delivered: meter
                .u64_counter("push_delivered_total")
                .with_description("Total number of device notifications accepted by the gateway")
                .build(),
            rejected: meter
                .u64_counter("push_rejected_total")
                .with_description("Total number of device notifications rejected by the gateway")
                .build(),
            retries: meter
                .u64_counter("push_retry_rounds_total")
                .with_description("Total number of automatic retry rounds")
                .build(),
            transport_errors: meter
                .u64_counter("push_transport_errors_total")
                .with_description("Total number of delivery rounds lost to transport failures")
                .build(),
        }
    }
}

/// Where a `send` call is in its retry budget.
#[derive(Debug)]
enum Round {
    Retry(Vec<String>),
    Finished,
}

#[derive(Debug)]
pub struct NotificationSender {
    pool: Arc<ConnectionPool>,
    policy: FailurePolicy,
    acquire_timeout: Duration,
    metrics: Metrics,
}

impl NotificationSender {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, policy: FailurePolicy) -> Self {
        Self { pool, policy, acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT, metrics: Metrics::new() }
    }

    /// Bounds how long `send` waits for a gateway connection.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Delivers a batch and returns the per-device outcomes, retrying the retryable subset
    /// once. Rejected tokens are reported, never deleted.
    ///
    /// `timeout` bounds each delivery round. Waiting for a connection is bounded by the
    /// sender's acquire timeout.
    ///
    /// # Errors
    /// Returns `AppError::TransportUnavailable` if no connection can be acquired or the first
    /// delivery round fails at the transport level.
    #[tracing::instrument(skip(self, payload), fields(targets = payload.targets().len(), retry_rounds = tracing::field::Empty))]
    pub async fn send(
        &self,
        environment: Environment,
        payload: &NotificationPayload,
        timeout: Duration,
    ) -> Result<DeliveryResult> {
        let conn = self.pool.acquire(environment, Purpose::Push, self.acquire_timeout).await?;

        let mut result = match self.deliver_round(&conn, payload, timeout).await {
            Ok(first) => first,
            Err(e) => {
                self.pool.discard(conn);
                return Err(AppError::TransportUnavailable(e));
            }
        };

        let mut round = self.next_round(&result, payload);
        while let Round::Retry(targets) = round {
            let Some(retry_payload) = payload.restricted_to(&targets) else {
                break;
            };
            self.metrics.retries.add(1, &[]);
            tracing::info!(count = targets.len(), "Retrying notifications marked retryable");

            round = match self.deliver_round(&conn, &retry_payload, timeout).await {
                Ok(retry) => {
                    result = result.merge_retry(&targets, retry);
                    self.next_round(&result, payload)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Retry round failed, keeping first-round outcomes");
                    result.errors.push(BatchError { code: UNKNOWN_ERROR, message: format!("retry round failed: {e}") });
                    result.retryable = targets;
                    result.retry_rounds += 1;
                    self.pool.discard(conn);
                    break;
                }
            };
        }

        tracing::Span::current().record("retry_rounds", result.retry_rounds);
        self.record_outcome(payload, &result);
        Ok(result)
    }

    fn next_round(&self, result: &DeliveryResult, payload: &NotificationPayload) -> Round {
        if result.retry_rounds >= MAX_RETRY_ROUNDS {
            if result.needs_retry() {
                tracing::info!(count = result.retryable.len(), "Retry budget exhausted, returning retryable tokens");
            }
            return Round::Finished;
        }

        let candidates = result.retry_candidates(payload, &self.policy);
        if candidates.is_empty() { Round::Finished } else { Round::Retry(candidates) }
    }

    async fn deliver_round(
        &self,
        conn: &PooledConnection,
        payload: &NotificationPayload,
        timeout: Duration,
    ) -> std::result::Result<DeliveryResult, TransportError> {
        let res = match tokio::time::timeout(timeout, conn.deliver(payload)).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::TimedOut),
        };

        match res {
            Ok(result) => {
                self.log_failures(&result);
                Ok(result)
            }
            Err(e) => {
                tracing::error!(error = %e, handle.id = conn.id(), "Can't reach push gateway");
                self.metrics.transport_errors.add(1, &[]);
                Err(e)
            }
        }
    }

    fn log_failures(&self, result: &DeliveryResult) {
        for (token, failure) in &result.failed {
            let kind = self.policy.classify(failure.code);
            tracing::warn!(token = %token, code = failure.code, ?kind, reason = %failure.message, "Device failed");
        }
        for error in &result.errors {
            tracing::error!(code = error.code, reason = %error.message, "Gateway reported batch error");
        }
    }

    fn record_outcome(&self, payload: &NotificationPayload, result: &DeliveryResult) {
        let undelivered = result.failed.len() + result.retryable.iter().filter(|t| !result.failed.contains_key(*t)).count();
        let delivered = payload.targets().len().saturating_sub(undelivered);
        self.metrics.delivered.add(delivered as u64, &[]);

        for failure in result.failed.values() {
            let kind = match self.policy.classify(failure.code) {
                RejectionKind::Permanent => "permanent",
                RejectionKind::Transient => "transient",
            };
            self.metrics.rejected.add(1, &[KeyValue::new("kind", kind)]);
        }
    }
}
