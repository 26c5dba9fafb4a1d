//! Owner of the single active history store
//!
//! The manager holds at most one open store. Switching closes the previous
//! store before the next one is opened, so two stores are never open at once.

use std::path::PathBuf;
use std::sync::Arc;

use parley_core::{AudioFile, HistoryConfig, Message, SystemTimeSource, TimeSource};
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

use super::models::{LogEntry, SessionRecord};
use super::store::HistoryStore;
use crate::errors::{StorageError, StorageResult};

pub struct HistoryManager {
    data_dir: Option<PathBuf>,
    clock: Arc<dyn TimeSource>,
    active: RwLock<Option<HistoryStore>>,
}

impl HistoryManager {
    /// Manager with no store open yet
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            clock: Arc::new(SystemTimeSource::new()),
            active: RwLock::new(None),
        }
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Make `username`'s store the active one
    ///
    /// Without a data directory the user gets a fresh temporary store.
    pub async fn switch_to_user(&self, username: &str) -> StorageResult<()> {
        let mut active = self.active.write().await;
        if let Some(current) = active.as_ref() {
            if current.owner() == Some(username) && !current.is_closed() {
                debug!("History store for {} already active", username);
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            previous.close().await;
        }

        let store = match &self.data_dir {
            Some(data_dir) => HistoryStore::open_for_user(data_dir, username).await?,
            None => HistoryStore::open_temporary().await?,
        };
        *active = Some(store.with_time_source(Arc::clone(&self.clock)));
        info!("History switched to {}", username);
        Ok(())
    }

    /// Replace the active store with a fresh temporary one
    ///
    /// Entries in a previous temporary store are discarded.
    pub async fn switch_to_temporary(&self) -> StorageResult<()> {
        let mut active = self.active.write().await;
        if let Some(previous) = active.take() {
            previous.close().await;
        }
        let store = HistoryStore::open_temporary().await?;
        *active = Some(store.with_time_source(Arc::clone(&self.clock)));
        debug!("History switched to a temporary store");
        Ok(())
    }

    /// Close the active store, leaving none open
    pub async fn close(&self) {
        if let Some(previous) = self.active.write().await.take() {
            previous.close().await;
        }
    }

    /// Handle to the active store
    pub async fn current(&self) -> Option<HistoryStore> {
        self.active.read().await.clone()
    }

    pub async fn current_owner(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .and_then(|store| store.owner().map(str::to_string))
    }

    /// Read access to the active store; a switch waits for the guard to drop
    async fn store(&self) -> StorageResult<RwLockReadGuard<'_, HistoryStore>> {
        RwLockReadGuard::try_map(self.active.read().await, Option::as_ref)
            .map_err(|_| StorageError::NoActiveStore)
    }

    // ------------------------------------------------------------------------
    // Store Operations
    // ------------------------------------------------------------------------

    pub async fn append_message(&self, message: &Message) -> StorageResult<i64> {
        self.store().await?.append_message(message).await
    }

    pub async fn append_audio(&self, audio: &AudioFile) -> StorageResult<i64> {
        self.store().await?.append_audio(audio).await
    }

    pub async fn query_conversation(&self, a: &str, b: &str) -> StorageResult<Vec<LogEntry>> {
        self.store().await?.query_conversation(a, b).await
    }

    pub async fn query_group_log(&self, group_id: i64) -> StorageResult<Vec<LogEntry>> {
        self.store().await?.query_group_log(group_id).await
    }

    pub async fn purge_older_than(&self, days: u32) -> StorageResult<u64> {
        self.store().await?.purge_older_than(days).await
    }

    pub async fn record_login(&self, username: &str) -> StorageResult<i64> {
        self.store().await?.record_login(username).await
    }

    pub async fn record_logout(&self, username: &str) -> StorageResult<bool> {
        self.store().await?.record_logout(username).await
    }

    pub async fn last_session(&self, username: &str) -> StorageResult<Option<SessionRecord>> {
        self.store().await?.last_session(username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Timestamp;

    #[tokio::test]
    async fn test_operations_fail_without_store() {
        let manager = HistoryManager::new(&HistoryConfig::default());
        let err = manager.query_group_log(1).await.unwrap_err();
        assert!(matches!(err, StorageError::NoActiveStore));
    }

    #[tokio::test]
    async fn test_switch_closes_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let manager = HistoryManager::new(&HistoryConfig::persistent(dir.path()));

        manager.switch_to_user("alice").await.unwrap();
        let alice = manager.current().await.unwrap();
        alice
            .append_message_log("alice", Some("bob"), None, "hello", Timestamp::new(1))
            .await
            .unwrap();

        manager.switch_to_user("bob").await.unwrap();
        assert!(alice.is_closed());
        assert_eq!(manager.current_owner().await.as_deref(), Some("bob"));
        assert!(manager.query_conversation("alice", "bob").await.unwrap().is_empty());

        manager.switch_to_user("alice").await.unwrap();
        assert_eq!(manager.query_conversation("alice", "bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_temporary_store_is_discarded() {
        let manager = HistoryManager::new(&HistoryConfig::default());
        manager.switch_to_temporary().await.unwrap();
        manager
            .append_message(&Message::private("alice", "bob", "ephemeral").at(Timestamp::new(1)))
            .await
            .unwrap();

        manager.switch_to_temporary().await.unwrap();
        assert!(manager.query_conversation("alice", "bob").await.unwrap().is_empty());
    }
}
