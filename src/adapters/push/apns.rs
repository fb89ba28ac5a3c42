use crate::adapters::push::{GatewayConnection, PushConnector};
use crate::domain::gateway::{Endpoint, Environment, Purpose};
use crate::domain::notification::{DeliveryResult, NotificationPayload};
use crate::domain::registration::Invalidation;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::PathBuf;

/// Connector that resolves gateway endpoints and validates the certificate profile, but only
/// logs what it would send. Wire framing belongs to the push client library.
#[derive(Debug, Clone)]
pub struct LoggingConnector {
    cert_path: PathBuf,
}

impl LoggingConnector {
    #[must_use]
    pub const fn new(cert_path: PathBuf) -> Self {
        Self { cert_path }
    }
}

#[async_trait]
impl PushConnector for LoggingConnector {
    async fn open(
        &self,
        environment: Environment,
        purpose: Purpose,
    ) -> Result<Box<dyn GatewayConnection>, TransportError> {
        let metadata = tokio::fs::metadata(&self.cert_path).await.map_err(|e| {
            TransportError::Connect(format!("certificate {} is unreadable: {e}", self.cert_path.display()))
        })?;
        if !metadata.is_file() {
            return Err(TransportError::Connect(format!("certificate {} is not a file", self.cert_path.display())));
        }

        let endpoint = environment.endpoint(purpose);
        tracing::info!(%endpoint, %environment, %purpose, "STUB: Opening gateway connection");
        Ok(Box::new(LoggingConnection { endpoint }))
    }
}

#[derive(Debug)]
struct LoggingConnection {
    endpoint: Endpoint,
}

#[async_trait]
impl GatewayConnection for LoggingConnection {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<DeliveryResult, TransportError> {
        for token in payload.targets() {
            tracing::info!(
                endpoint = %self.endpoint,
                token = %token,
                title = %payload.title(),
                badge = payload.badge(),
                "STUB: Sending push notification"
            );
        }
        Ok(DeliveryResult::default())
    }

    fn feedback(&self) -> BoxStream<'_, Result<Invalidation, TransportError>> {
        tracing::info!(endpoint = %self.endpoint, "STUB: Reading feedback service");
        futures::stream::empty().boxed()
    }

    async fn close(&self) {
        tracing::debug!(endpoint = %self.endpoint, "Closing gateway connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_requires_certificate() {
        let connector = LoggingConnector::new(PathBuf::from("/nonexistent/apns-cert.pem"));
        let res = connector.open(Environment::Sandbox, Purpose::Push).await;
        assert!(matches!(res, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn test_stub_reports_success_and_no_feedback() {
        let cert = std::env::temp_dir().join(format!("apns-relay-test-{}.pem", uuid::Uuid::new_v4()));
        tokio::fs::write(&cert, b"cert").await.unwrap();

        let connector = LoggingConnector::new(cert.clone());
        let conn = connector.open(Environment::Production, Purpose::Push).await.unwrap();
        let payload = NotificationPayload::new(vec!["AB".to_string()], "Hi", "There", 1).unwrap();

        assert_eq!(conn.deliver(&payload).await.unwrap(), DeliveryResult::default());
        assert_eq!(conn.feedback().count().await, 0);

        let _ = tokio::fs::remove_file(cert).await;
    }
}
