//! Records read back from the local history store

use parley_core::{AudioFormat, Timestamp};
use serde::{Deserialize, Serialize};

use crate::errors::{StorageError, StorageResult};

/// Routing class of a log entry, derived from its recipient and group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Private,
    Group,
    /// Neither a recipient nor a group: notices and broadcasts
    System,
}

impl EntryKind {
    /// Classify a route; naming both a recipient and a group is invalid
    pub fn classify(recipient: Option<&str>, group_id: Option<i64>) -> StorageResult<Self> {
        match (recipient, group_id) {
            (Some(_), Some(_)) => Err(StorageError::invalid_entry(
                "entry names both a recipient and a group",
            )),
            (Some(_), None) => Ok(EntryKind::Private),
            (None, Some(_)) => Ok(EntryKind::Group),
            (None, None) => Ok(EntryKind::System),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Private => "private",
            EntryKind::Group => "group",
            EntryKind::System => "system",
        }
    }

    /// Parse a stored kind read from `table`
    pub(crate) fn parse(value: &str, table: &'static str) -> StorageResult<Self> {
        match value {
            "private" => Ok(EntryKind::Private),
            "group" => Ok(EntryKind::Group),
            "system" => Ok(EntryKind::System),
            other => Err(StorageError::CorruptRow {
                table,
                reason: format!("unknown entry kind '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    pub id: i64,
    pub kind: EntryKind,
    pub sender: String,
    pub recipient: Option<String>,
    pub group_id: Option<i64>,
    pub content: String,
    pub sent_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioLog {
    pub id: i64,
    pub kind: EntryKind,
    pub sender: String,
    pub recipient: Option<String>,
    pub group_id: Option<i64>,
    pub data: Vec<u8>,
    pub format: AudioFormat,
    pub duration_seconds: f64,
    pub sent_at: Timestamp,
}

/// One entry of a conversation, text or audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogEntry {
    Message(MessageLog),
    Audio(AudioLog),
}

impl LogEntry {
    pub fn sender(&self) -> &str {
        match self {
            LogEntry::Message(m) => &m.sender,
            LogEntry::Audio(a) => &a.sender,
        }
    }

    pub fn sent_at(&self) -> Timestamp {
        match self {
            LogEntry::Message(m) => m.sent_at,
            LogEntry::Audio(a) => a.sent_at,
        }
    }

    pub fn group_id(&self) -> Option<i64> {
        match self {
            LogEntry::Message(m) => m.group_id,
            LogEntry::Audio(a) => a.group_id,
        }
    }

    /// Text content; `None` for audio
    pub fn content(&self) -> Option<&str> {
        match self {
            LogEntry::Message(m) => Some(&m.content),
            LogEntry::Audio(_) => None,
        }
    }
}

/// One login of the store's owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub username: String,
    pub logged_in_at: Timestamp,
    pub logged_out_at: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(EntryKind::classify(Some("bob"), None).unwrap(), EntryKind::Private);
        assert_eq!(EntryKind::classify(None, Some(4)).unwrap(), EntryKind::Group);
        assert_eq!(EntryKind::classify(None, None).unwrap(), EntryKind::System);
        assert!(matches!(
            EntryKind::classify(Some("bob"), Some(4)),
            Err(StorageError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_corrupt_kind_names_its_table() {
        assert_eq!(EntryKind::parse("group", "audio_logs").unwrap(), EntryKind::Group);
        match EntryKind::parse("broadcast", "audio_logs") {
            Err(StorageError::CorruptRow { table, reason }) => {
                assert_eq!(table, "audio_logs");
                assert!(reason.contains("broadcast"));
            }
            other => panic!("expected a corrupt row, got {:?}", other),
        }
    }
}
