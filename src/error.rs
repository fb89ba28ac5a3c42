use thiserror::Error;

/// Failures talking to the gateway below the notification level.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Operation timed out")]
    TimedOut,
    #[error("Connection is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential store error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Push gateway unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),
    #[error("Feedback query failed: {0}")]
    ReconciliationQueryFailed(String),
    #[error("Invalid notification payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
