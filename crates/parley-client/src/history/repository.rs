//! SQL for the three history tables
//!
//! Each repository borrows the store's pool for the duration of one call.
//! Text and audio entries share one `seq` counter so a merged conversation can
//! be ordered by `sent_at` and then by insertion.

use parley_core::{AudioFormat, Timestamp};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

use super::models::{AudioLog, EntryKind, MessageLog, SessionRecord};
use crate::errors::{StorageError, StorageResult};

/// Schema applied when a store is opened
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS message_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('private', 'group', 'system')),
    sender TEXT NOT NULL,
    recipient TEXT,
    group_id INTEGER,
    content TEXT NOT NULL,
    sent_at INTEGER NOT NULL,
    CHECK (recipient IS NULL OR group_id IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_message_logs_pair ON message_logs(sender, recipient);
CREATE INDEX IF NOT EXISTS idx_message_logs_group ON message_logs(group_id);
CREATE INDEX IF NOT EXISTS idx_message_logs_sent_at ON message_logs(sent_at);

CREATE TABLE IF NOT EXISTS audio_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seq INTEGER NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('private', 'group', 'system')),
    sender TEXT NOT NULL,
    recipient TEXT,
    group_id INTEGER,
    data BLOB NOT NULL,
    format TEXT NOT NULL,
    duration_seconds REAL NOT NULL,
    sent_at INTEGER NOT NULL,
    CHECK (recipient IS NULL OR group_id IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_audio_logs_pair ON audio_logs(sender, recipient);
CREATE INDEX IF NOT EXISTS idx_audio_logs_group ON audio_logs(group_id);
CREATE INDEX IF NOT EXISTS idx_audio_logs_sent_at ON audio_logs(sent_at);

CREATE TABLE IF NOT EXISTS session_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    logged_in_at INTEGER NOT NULL,
    logged_out_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_session_records_username ON session_records(username);
"#;

const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM \
     (SELECT seq FROM message_logs UNION ALL SELECT seq FROM audio_logs))";

fn to_sql_millis(ts: Timestamp) -> i64 {
    i64::try_from(ts.as_millis()).unwrap_or(i64::MAX)
}

fn from_sql_millis(millis: i64) -> Timestamp {
    Timestamp::new(u64::try_from(millis).unwrap_or(0))
}

/// Where an entry is addressed
#[derive(Debug, Clone, Copy)]
pub(crate) struct Route<'a> {
    pub sender: &'a str,
    pub recipient: Option<&'a str>,
    pub group_id: Option<i64>,
}

impl Route<'_> {
    fn kind(&self) -> StorageResult<EntryKind> {
        EntryKind::classify(self.recipient, self.group_id)
    }
}

// ----------------------------------------------------------------------------
// Message Logs
// ----------------------------------------------------------------------------

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    seq: i64,
    kind: String,
    sender: String,
    recipient: Option<String>,
    group_id: Option<i64>,
    content: String,
    sent_at: i64,
}

impl MessageRow {
    fn into_log(self) -> StorageResult<(i64, MessageLog)> {
        Ok((
            self.seq,
            MessageLog {
                id: self.id,
                kind: EntryKind::parse(&self.kind, "message_logs")?,
                sender: self.sender,
                recipient: self.recipient,
                group_id: self.group_id,
                content: self.content,
                sent_at: from_sql_millis(self.sent_at),
            },
        ))
    }
}

pub(crate) struct MessageLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MessageLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        route: Route<'_>,
        content: &str,
        sent_at: Timestamp,
    ) -> StorageResult<i64> {
        let kind = route.kind()?;
        let sql = format!(
            "INSERT INTO message_logs (seq, kind, sender, recipient, group_id, content, sent_at) \
             VALUES ({}, ?, ?, ?, ?, ?, ?)",
            NEXT_SEQ
        );
        let result = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(route.sender)
            .bind(route.recipient)
            .bind(route.group_id)
            .bind(content)
            .bind(to_sql_millis(sent_at))
            .execute(self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Private entries between `a` and `b` in either direction, with sequence numbers
    pub async fn between(&self, a: &str, b: &str) -> StorageResult<Vec<(i64, MessageLog)>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, seq, kind, sender, recipient, group_id, content, sent_at
            FROM message_logs
            WHERE group_id IS NULL
              AND ((sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1))
            ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_log).collect()
    }

    pub async fn in_group(&self, group_id: i64) -> StorageResult<Vec<(i64, MessageLog)>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, seq, kind, sender, recipient, group_id, content, sent_at
            FROM message_logs
            WHERE group_id = ?
            ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_log).collect()
    }

    pub async fn count(&self) -> StorageResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_logs")
            .fetch_one(self.pool)
            .await?)
    }
}

// ----------------------------------------------------------------------------
// Audio Logs
// ----------------------------------------------------------------------------

#[derive(FromRow)]
struct AudioRow {
    id: i64,
    seq: i64,
    kind: String,
    sender: String,
    recipient: Option<String>,
    group_id: Option<i64>,
    data: Vec<u8>,
    format: String,
    duration_seconds: f64,
    sent_at: i64,
}

impl AudioRow {
    fn into_log(self) -> StorageResult<(i64, AudioLog)> {
        let format: AudioFormat = self.format.parse().map_err(|_| StorageError::CorruptRow {
            table: "audio_logs",
            reason: format!("unknown audio format '{}'", self.format),
        })?;
        Ok((
            self.seq,
            AudioLog {
                id: self.id,
                kind: EntryKind::parse(&self.kind, "audio_logs")?,
                sender: self.sender,
                recipient: self.recipient,
                group_id: self.group_id,
                data: self.data,
                format,
                duration_seconds: self.duration_seconds,
                sent_at: from_sql_millis(self.sent_at),
            },
        ))
    }
}

pub(crate) struct AudioLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AudioLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        route: Route<'_>,
        data: &[u8],
        format: AudioFormat,
        duration_seconds: f64,
        sent_at: Timestamp,
    ) -> StorageResult<i64> {
        let kind = route.kind()?;
        if !duration_seconds.is_finite() || duration_seconds < 0.0 {
            return Err(StorageError::invalid_entry(format!(
                "audio duration {} is not a non-negative number of seconds",
                duration_seconds
            )));
        }
        let sql = format!(
            "INSERT INTO audio_logs \
             (seq, kind, sender, recipient, group_id, data, format, duration_seconds, sent_at) \
             VALUES ({}, ?, ?, ?, ?, ?, ?, ?, ?)",
            NEXT_SEQ
        );
        let result = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(route.sender)
            .bind(route.recipient)
            .bind(route.group_id)
            .bind(data)
            .bind(format.as_str())
            .bind(duration_seconds)
            .bind(to_sql_millis(sent_at))
            .execute(self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn between(&self, a: &str, b: &str) -> StorageResult<Vec<(i64, AudioLog)>> {
        let rows: Vec<AudioRow> = sqlx::query_as(
            r#"
            SELECT id, seq, kind, sender, recipient, group_id, data, format,
                   duration_seconds, sent_at
            FROM audio_logs
            WHERE group_id IS NULL
              AND ((sender = ?1 AND recipient = ?2) OR (sender = ?2 AND recipient = ?1))
            ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(AudioRow::into_log).collect()
    }

    pub async fn in_group(&self, group_id: i64) -> StorageResult<Vec<(i64, AudioLog)>> {
        let rows: Vec<AudioRow> = sqlx::query_as(
            r#"
            SELECT id, seq, kind, sender, recipient, group_id, data, format,
                   duration_seconds, sent_at
            FROM audio_logs
            WHERE group_id = ?
            ORDER BY sent_at ASC, seq ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(AudioRow::into_log).collect()
    }

    pub async fn count(&self) -> StorageResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audio_logs")
            .fetch_one(self.pool)
            .await?)
    }
}

/// Delete text and audio entries older than `cutoff` in one transaction
pub(crate) async fn purge_before(pool: &SqlitePool, cutoff: Timestamp) -> StorageResult<u64> {
    let cutoff = to_sql_millis(cutoff);
    let mut tx = pool.begin().await?;
    let messages = sqlx::query("DELETE FROM message_logs WHERE sent_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let audio = sqlx::query("DELETE FROM audio_logs WHERE sent_at < ?")
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(messages + audio)
}

// ----------------------------------------------------------------------------
// Session Records
// ----------------------------------------------------------------------------

#[derive(FromRow)]
struct SessionRow {
    id: i64,
    username: String,
    logged_in_at: i64,
    logged_out_at: Option<i64>,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            id: row.id,
            username: row.username,
            logged_in_at: from_sql_millis(row.logged_in_at),
            logged_out_at: row.logged_out_at.map(from_sql_millis),
        }
    }
}

pub(crate) struct SessionRecordRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRecordRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(&self, username: &str, at: Timestamp) -> StorageResult<i64> {
        let sql = "INSERT INTO session_records (username, logged_in_at) VALUES (?, ?)";
        let result = sqlx::query(sql)
            .bind(username)
            .bind(to_sql_millis(at))
            .execute(self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Close the newest open record of `username`; `false` if none was open
    pub async fn close_latest(&self, username: &str, at: Timestamp) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE session_records SET logged_out_at = ?
            WHERE id = (
                SELECT id FROM session_records
                WHERE username = ? AND logged_out_at IS NULL
                ORDER BY id DESC LIMIT 1
            )
            "#,
        )
        .bind(to_sql_millis(at))
        .bind(username)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn latest(&self, username: &str) -> StorageResult<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, username, logged_in_at, logged_out_at
            FROM session_records
            WHERE username = ?
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(SessionRecord::from))
    }
}
