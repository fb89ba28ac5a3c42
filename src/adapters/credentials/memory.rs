use crate::adapters::credentials::CredentialStore;
use crate::domain::registration::DeviceRegistration;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    registrations: Arc<DashMap<String, DeviceRegistration>>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or refreshes a token for a user, stamping it with the current time.
    pub fn register(&self, user_id: Uuid, token: &str) -> DeviceRegistration {
        self.register_at(user_id, token, OffsetDateTime::now_utc())
    }

    pub fn register_at(&self, user_id: Uuid, token: &str, last_update: OffsetDateTime) -> DeviceRegistration {
        let registration = DeviceRegistration { token: token.to_string(), user_id, last_update };
        self.registrations.insert(token.to_string(), registration.clone());
        registration
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.registrations.contains_key(token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_identifier(&self, token: &str) -> Result<Option<DeviceRegistration>, StoreError> {
        Ok(self.registrations.get(token).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, token: &str) -> Result<bool, StoreError> {
        Ok(self.registrations.remove(token).is_some())
    }
}
