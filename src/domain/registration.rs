use crate::domain::gateway::Environment;
use crate::error::AppError;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRegistration {
    pub token: String,
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
}

impl DeviceRegistration {
    /// A registration is stale only if the gateway invalidated the token strictly after the
    /// device last registered it.
    #[must_use]
    pub fn is_invalidated_by(&self, invalidation: &Invalidation) -> bool {
        self.last_update < invalidation.invalidated_at
    }
}

/// One feedback record: the gateway stopped accepting `token` at `invalidated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invalidation {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub invalidated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileStatus {
    Completed,
    QueryFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreFailure {
    pub token: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub environment: Environment,
    pub examined: usize,
    pub deleted: Vec<String>,
    pub retained: Vec<String>,
    pub absent: Vec<String>,
    pub store_errors: Vec<StoreFailure>,
    #[serde(flatten)]
    pub status: ReconcileStatus,
}

impl ReconciliationReport {
    #[must_use]
    pub const fn new(environment: Environment) -> Self {
        Self {
            environment,
            examined: 0,
            deleted: Vec::new(),
            retained: Vec::new(),
            absent: Vec::new(),
            store_errors: Vec::new(),
            status: ReconcileStatus::Completed,
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, ReconcileStatus::Completed)
    }

    /// Surfaces an aborted run as a typed error.
    ///
    /// # Errors
    /// Returns `AppError::ReconciliationQueryFailed` if the feedback query failed.
    pub fn check(&self) -> Result<(), AppError> {
        match &self.status {
            ReconcileStatus::Completed => Ok(()),
            ReconcileStatus::QueryFailed { reason } => Err(AppError::ReconciliationQueryFailed(reason.clone())),
        }
    }
}
