use crate::domain::gateway::{Environment, Purpose};
use crate::domain::notification::{DeliveryResult, NotificationPayload};
use crate::domain::registration::Invalidation;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub mod apns;

pub use apns::LoggingConnector;

/// Opens authenticated connections to the push gateway.
#[async_trait]
pub trait PushConnector: Send + Sync + std::fmt::Debug {
    /// Performs the handshake for a connection of the given purpose.
    ///
    /// # Errors
    /// Returns a `TransportError` if the gateway cannot be reached or rejects the certificate.
    async fn open(
        &self,
        environment: Environment,
        purpose: Purpose,
    ) -> Result<Box<dyn GatewayConnection>, TransportError>;
}

/// One authenticated channel to the gateway, as provided by the push client library.
#[async_trait]
pub trait GatewayConnection: Send + Sync + std::fmt::Debug {
    /// Sends a batch and reports per-device and batch-level outcomes.
    ///
    /// # Errors
    /// Returns a `TransportError` if the batch could not be written or its status read.
    async fn deliver(&self, payload: &NotificationPayload) -> Result<DeliveryResult, TransportError>;

    /// Streams the invalidation reports the gateway has queued since the last read.
    fn feedback(&self) -> BoxStream<'_, Result<Invalidation, TransportError>>;

    async fn close(&self);
}
