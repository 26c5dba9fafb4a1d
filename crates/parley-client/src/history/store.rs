//! One user's local history database
//!
//! A store is a SQLite database behind a single-connection pool, so every
//! operation on it is serialized. File-backed stores run with
//! `synchronous=FULL`: an append has reached disk when it returns.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parley_core::{AudioFile, AudioFormat, Message, SystemTimeSource, TimeSource, Timestamp};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use super::models::{LogEntry, SessionRecord};
use super::paths::store_path;
use super::repository::{
    purge_before, AudioLogRepository, MessageLogRepository, Route, SessionRecordRepository, SCHEMA,
};
use crate::errors::{StorageError, StorageResult};

/// Per-user history database
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
    owner: Option<String>,
    clock: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("path", &self.path)
            .field("owner", &self.owner)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl HistoryStore {
    /// Open or create `username`'s store under `data_dir`
    pub async fn open_for_user(data_dir: &Path, username: &str) -> StorageResult<Self> {
        let path = store_path(data_dir, username);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let store = Self::connect(options, Some(path.clone()), Some(username.to_string())).await?;
        info!("Opened history store {}", path.display());
        Ok(store)
    }

    /// Open a disposable in-memory store
    pub async fn open_temporary() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .synchronous(SqliteSynchronous::Full);
        let store = Self::connect(options, None, None).await?;
        debug!("Opened temporary history store");
        Ok(store)
    }

    async fn connect(
        options: SqliteConnectOptions,
        path: Option<PathBuf>,
        owner: Option<String>,
    ) -> StorageResult<Self> {
        // One connection that never expires: serializes access and keeps an
        // in-memory database alive for the lifetime of the pool
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self {
            pool,
            path,
            owner,
            clock: Arc::new(SystemTimeSource::new()),
        })
    }

    /// Replace the clock used for purges and session records
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// File backing the store; `None` for a temporary store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// User the store belongs to; `None` for a temporary store
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_temporary(&self) -> bool {
        self.path.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool; later operations fail
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Closed history store {:?}", self.path);
    }

    // ------------------------------------------------------------------------
    // Appends
    // ------------------------------------------------------------------------

    /// Append a text entry and return its row id
    ///
    /// Naming both a recipient and a group is rejected; naming neither makes
    /// a system entry.
    pub async fn append_message_log(
        &self,
        sender: &str,
        recipient: Option<&str>,
        group_id: Option<i64>,
        content: &str,
        sent_at: Timestamp,
    ) -> StorageResult<i64> {
        let route = Route {
            sender,
            recipient,
            group_id,
        };
        MessageLogRepository::new(&self.pool)
            .insert(route, content, sent_at)
            .await
    }

    /// Append an audio entry and return its row id
    #[allow(clippy::too_many_arguments)]
    pub async fn append_audio_log(
        &self,
        sender: &str,
        recipient: Option<&str>,
        group_id: Option<i64>,
        data: &[u8],
        format: AudioFormat,
        duration_seconds: f64,
        sent_at: Timestamp,
    ) -> StorageResult<i64> {
        let route = Route {
            sender,
            recipient,
            group_id,
        };
        AudioLogRepository::new(&self.pool)
            .insert(route, data, format, duration_seconds, sent_at)
            .await
    }

    pub async fn append_message(&self, message: &Message) -> StorageResult<i64> {
        self.append_message_log(
            &message.sender,
            message.recipient.as_deref(),
            message.group_id,
            &message.content,
            message.sent_at,
        )
        .await
    }

    pub async fn append_audio(&self, audio: &AudioFile) -> StorageResult<i64> {
        self.append_audio_log(
            &audio.sender,
            audio.recipient.as_deref(),
            audio.group_id,
            &audio.data,
            audio.format,
            audio.duration_seconds,
            audio.sent_at,
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Private entries between `a` and `b` in both directions
    ///
    /// Text and audio are merged, ascending by `sent_at` and then by insertion.
    pub async fn query_conversation(&self, a: &str, b: &str) -> StorageResult<Vec<LogEntry>> {
        let messages = MessageLogRepository::new(&self.pool).between(a, b).await?;
        let audio = AudioLogRepository::new(&self.pool).between(a, b).await?;
        Ok(merge(messages, audio))
    }

    /// Entries addressed to `group_id`, oldest first
    pub async fn query_group_log(&self, group_id: i64) -> StorageResult<Vec<LogEntry>> {
        let messages = MessageLogRepository::new(&self.pool).in_group(group_id).await?;
        let audio = AudioLogRepository::new(&self.pool).in_group(group_id).await?;
        Ok(merge(messages, audio))
    }

    /// Total text and audio entries
    pub async fn entry_count(&self) -> StorageResult<u64> {
        let messages = MessageLogRepository::new(&self.pool).count().await?;
        let audio = AudioLogRepository::new(&self.pool).count().await?;
        Ok((messages + audio).max(0) as u64)
    }

    /// Delete entries sent more than `days` days before now; returns how many
    pub async fn purge_older_than(&self, days: u32) -> StorageResult<u64> {
        let cutoff = self.clock.now().days_before(days);
        let purged = purge_before(&self.pool, cutoff).await?;
        if purged > 0 {
            info!("Purged {} history entries older than {} days", purged, days);
        }
        Ok(purged)
    }

    // ------------------------------------------------------------------------
    // Session Records
    // ------------------------------------------------------------------------

    pub async fn record_login(&self, username: &str) -> StorageResult<i64> {
        SessionRecordRepository::new(&self.pool)
            .open(username, self.clock.now())
            .await
    }

    /// Stamp the logout time on `username`'s open session; `false` if none was open
    pub async fn record_logout(&self, username: &str) -> StorageResult<bool> {
        SessionRecordRepository::new(&self.pool)
            .close_latest(username, self.clock.now())
            .await
    }

    pub async fn last_session(&self, username: &str) -> StorageResult<Option<SessionRecord>> {
        SessionRecordRepository::new(&self.pool).latest(username).await
    }
}

fn merge(
    messages: Vec<(i64, super::models::MessageLog)>,
    audio: Vec<(i64, super::models::AudioLog)>,
) -> Vec<LogEntry> {
    let mut entries: Vec<(i64, LogEntry)> = messages
        .into_iter()
        .map(|(seq, m)| (seq, LogEntry::Message(m)))
        .chain(audio.into_iter().map(|(seq, a)| (seq, LogEntry::Audio(a))))
        .collect();
    entries.sort_by_key(|(seq, entry)| (entry.sent_at(), *seq));
    entries.into_iter().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::MILLIS_PER_DAY;
    use parley_core::FixedTimeSource;

    const NOW: u64 = 1_700_000_000_000;

    async fn store() -> HistoryStore {
        HistoryStore::open_temporary()
            .await
            .unwrap()
            .with_time_source(Arc::new(FixedTimeSource(Timestamp::new(NOW))))
    }

    #[tokio::test]
    async fn test_conversation_is_symmetric_and_excludes_third_parties() {
        let store = store().await;
        for (sender, recipient, content, at) in [
            ("alice", "bob", "hi bob", 10),
            ("bob", "alice", "hi alice", 20),
            ("alice", "carol", "hi carol", 15),
        ] {
            store
                .append_message_log(sender, Some(recipient), None, content, Timestamp::new(at))
                .await
                .unwrap();
        }

        let ab = store.query_conversation("alice", "bob").await.unwrap();
        let ba = store.query_conversation("bob", "alice").await.unwrap();
        assert_eq!(ab, ba);
        let contents: Vec<_> = ab.iter().filter_map(|e| e.content()).collect();
        assert_eq!(contents, vec!["hi bob", "hi alice"]);

        let ac = store.query_conversation("alice", "carol").await.unwrap();
        assert_eq!(ac.len(), 1);
        assert_eq!(ac[0].content(), Some("hi carol"));
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order_across_tables() {
        let store = store().await;
        let at = Timestamp::new(500);
        store.append_message_log("alice", Some("bob"), None, "first", at).await.unwrap();
        store
            .append_audio_log("bob", Some("alice"), None, &[1, 2, 3], AudioFormat::Wav, 0.5, at)
            .await
            .unwrap();
        store.append_message_log("alice", Some("bob"), None, "third", at).await.unwrap();

        let entries = store.query_conversation("alice", "bob").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].content(), Some("first"));
        assert!(matches!(&entries[1], LogEntry::Audio(a) if a.data == vec![1, 2, 3]));
        assert_eq!(entries[2].content(), Some("third"));
    }

    #[tokio::test]
    async fn test_both_routes_rejected() {
        let store = store().await;
        let err = store
            .append_message_log("alice", Some("bob"), Some(7), "x", Timestamp::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidEntry { .. }));
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_group_log_is_filtered() {
        let store = store().await;
        store.append_message_log("alice", None, Some(1), "g1", Timestamp::new(1)).await.unwrap();
        store.append_message_log("alice", None, Some(2), "g2", Timestamp::new(2)).await.unwrap();
        store
            .append_message_log("alice", Some("bob"), None, "dm", Timestamp::new(3))
            .await
            .unwrap();

        let log = store.query_group_log(1).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].group_id(), Some(1));
    }

    #[tokio::test]
    async fn test_purge_by_age() {
        let store = store().await;
        let days_ago = |days: u64| Timestamp::new(NOW - days * MILLIS_PER_DAY);
        store.append_message_log("alice", Some("bob"), None, "old", days_ago(40)).await.unwrap();
        store.append_message_log("alice", Some("bob"), None, "recent", days_ago(29)).await.unwrap();
        store.append_message_log("alice", Some("bob"), None, "today", days_ago(0)).await.unwrap();

        assert_eq!(store.purge_older_than(30).await.unwrap(), 1);
        let left: Vec<_> = store
            .query_conversation("alice", "bob")
            .await
            .unwrap()
            .iter()
            .filter_map(|e| e.content().map(str::to_string))
            .collect();
        assert_eq!(left, vec!["recent", "today"]);
    }

    #[tokio::test]
    async fn test_session_records() {
        let store = store().await;
        assert!(store.last_session("alice").await.unwrap().is_none());
        assert!(!store.record_logout("alice").await.unwrap());

        store.record_login("alice").await.unwrap();
        let open = store.last_session("alice").await.unwrap().unwrap();
        assert_eq!(open.logged_in_at, Timestamp::new(NOW));
        assert!(open.logged_out_at.is_none());

        assert!(store.record_logout("alice").await.unwrap());
        let closed = store.last_session("alice").await.unwrap().unwrap();
        assert_eq!(closed.logged_out_at, Some(Timestamp::new(NOW)));
    }
}
