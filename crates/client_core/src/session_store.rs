use anyhow::Result;
use async_trait::async_trait;
use shared::domain::UserProfile;
use storage::Storage;

use crate::SessionStore;

const DEFAULT_SLOT: &str = "default";

/// Sqlite-backed session record; the signed-in user survives restarts until
/// an explicit logout clears the slot.
pub struct DurableSessionStore {
    storage: Storage,
    slot: String,
}

impl DurableSessionStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            slot: DEFAULT_SLOT.to_string(),
        }
    }

    pub fn with_slot(storage: Storage, slot: impl Into<String>) -> Self {
        Self {
            storage,
            slot: slot.into(),
        }
    }
}

#[async_trait]
impl SessionStore for DurableSessionStore {
    async fn load(&self) -> Result<Option<UserProfile>> {
        self.storage.load_session(&self.slot).await
    }

    async fn save(&self, user: &UserProfile) -> Result<()> {
        self.storage.save_session(&self.slot, user).await
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear_session(&self.slot).await?;
        Ok(())
    }
}
