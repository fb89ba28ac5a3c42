use crate::domain::registration::DeviceRegistration;
use crate::error::StoreError;
use async_trait::async_trait;

pub mod memory;

pub use memory::InMemoryCredentialStore;

/// Persistence of device registrations. Deletes must be atomic per token.
#[async_trait]
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Looks up the current registration for a device token.
    ///
    /// # Errors
    /// Returns a `StoreError` if the backend query fails.
    async fn find_by_identifier(&self, token: &str) -> Result<Option<DeviceRegistration>, StoreError>;

    /// Deletes the registration for a device token. Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns a `StoreError` if the backend delete fails.
    async fn delete(&self, token: &str) -> Result<bool, StoreError>;
}
