//! Domain entities
//!
//! Value records used to populate request payloads and interpret response and
//! event payloads. Records are plain data; the only behaviour is membership
//! bookkeeping and conversation routing.

use core::fmt;
use core::str::FromStr;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Payload;
use crate::types::Timestamp;
use crate::{ParleyError, Result};

// ----------------------------------------------------------------------------
// Payload Conversion
// ----------------------------------------------------------------------------

/// Records that travel as a whole payload object
pub trait PayloadRecord: Serialize + DeserializeOwned {
    fn to_payload(&self) -> Result<Payload> {
        Payload::from_record(self)
    }

    fn from_payload(payload: &Payload) -> Result<Self> {
        payload.to_record()
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

// ----------------------------------------------------------------------------
// Member Set
// ----------------------------------------------------------------------------

/// Order-preserving set of usernames
///
/// Adding a present member and removing an absent one are both no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct MemberSet(Vec<String>);

impl MemberSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a member; returns `false` if already present
    pub fn insert(&mut self, member: impl Into<String>) -> bool {
        let member = member.into();
        if self.contains(&member) {
            return false;
        }
        self.0.push(member);
        true
    }

    /// Remove a member; returns `false` if absent
    pub fn remove(&mut self, member: &str) -> bool {
        match self.0.iter().position(|m| m == member) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        self.0.iter().any(|m| m == member)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for MemberSet {
    fn from(members: Vec<String>) -> Self {
        members.into_iter().collect()
    }
}

impl From<MemberSet> for Vec<String> {
    fn from(set: MemberSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for MemberSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

// ----------------------------------------------------------------------------
// Users, Groups and Channels
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub online: bool,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name: None,
            online: false,
        }
    }

    /// Name to show in listings
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub members: MemberSet,
}

impl Group {
    /// New group whose first member is its owner
    pub fn new(id: i64, name: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let mut members = MemberSet::new();
        members.insert(owner.clone());
        Self {
            id,
            name: name.into(),
            owner,
            members,
        }
    }

    pub fn add_member(&mut self, username: impl Into<String>) -> bool {
        self.members.insert(username)
    }

    pub fn remove_member(&mut self, username: &str) -> bool {
        self.members.remove(username)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subscribers: MemberSet,
}

impl Channel {
    pub fn new(id: i64, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: owner.into(),
            description: None,
            subscribers: MemberSet::new(),
        }
    }

    pub fn subscribe(&mut self, username: impl Into<String>) -> bool {
        self.subscribers.insert(username)
    }

    pub fn unsubscribe(&mut self, username: &str) -> bool {
        self.subscribers.remove(username)
    }
}

// ----------------------------------------------------------------------------
// Invitations and Join Requests
// ----------------------------------------------------------------------------

/// Lifecycle of an invitation or a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl ResolutionStatus {
    pub fn from_decision(accept: bool) -> Self {
        if accept {
            ResolutionStatus::Accepted
        } else {
            ResolutionStatus::Declined
        }
    }
}

/// Group owner inviting a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: i64,
    pub group_id: i64,
    pub inviter: String,
    pub invitee: String,
    #[serde(default)]
    pub status: ResolutionStatus,
    pub created_at: Timestamp,
}

/// User asking to join a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: i64,
    pub group_id: i64,
    pub requester: String,
    #[serde(default)]
    pub status: ResolutionStatus,
    pub created_at: Timestamp,
}

// ----------------------------------------------------------------------------
// Messages and Audio
// ----------------------------------------------------------------------------

/// Where a message is routed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Conversation {
    Private { peer: String },
    Group { group_id: i64 },
}

fn route(recipient: &Option<String>, group_id: Option<i64>) -> Result<Conversation> {
    match (recipient, group_id) {
        (Some(peer), None) => Ok(Conversation::Private { peer: peer.clone() }),
        (None, Some(group_id)) => Ok(Conversation::Group { group_id }),
        (Some(_), Some(_)) => Err(ParleyError::invalid_value(
            "recipient",
            "message addresses both a user and a group",
        )),
        (None, None) => Err(ParleyError::missing_key("recipient")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    pub content: String,
    pub sent_at: Timestamp,
}

impl Message {
    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            recipient: Some(recipient.into()),
            group_id: None,
            content: content.into(),
            sent_at: Timestamp::now(),
        }
    }

    pub fn group(sender: impl Into<String>, group_id: i64, content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            recipient: None,
            group_id: Some(group_id),
            content: content.into(),
            sent_at: Timestamp::now(),
        }
    }

    pub fn at(mut self, sent_at: Timestamp) -> Self {
        self.sent_at = sent_at;
        self
    }

    /// Private peer or group; errors when the routing fields are inconsistent
    pub fn conversation(&self) -> Result<Conversation> {
        route(&self.recipient, self.group_id)
    }
}

/// Container format of an audio clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// RIFF/WAVE framed PCM
    Wav,
    /// Headerless 16-bit little-endian PCM
    Pcm16,
    Ogg,
    Mp3,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm16 => "pcm16",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp3 => "mp3",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Ok(AudioFormat::Wav),
            "pcm" | "pcm16" | "raw" => Ok(AudioFormat::Pcm16),
            "ogg" => Ok(AudioFormat::Ogg),
            "mp3" => Ok(AudioFormat::Mp3),
            other => Err(ParleyError::invalid_value(
                "format",
                format!("unknown audio format '{}'", other),
            )),
        }
    }
}

/// Voice message; bytes travel base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub format: AudioFormat,
    pub duration_seconds: f64,
    pub sent_at: Timestamp,
}

impl AudioFile {
    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        data: Vec<u8>,
        format: AudioFormat,
        duration_seconds: f64,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            recipient: Some(recipient.into()),
            group_id: None,
            data,
            format,
            duration_seconds,
            sent_at: Timestamp::now(),
        }
    }

    pub fn group(
        sender: impl Into<String>,
        group_id: i64,
        data: Vec<u8>,
        format: AudioFormat,
        duration_seconds: f64,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            recipient: None,
            group_id: Some(group_id),
            data,
            format,
            duration_seconds,
            sent_at: Timestamp::now(),
        }
    }

    pub fn at(mut self, sent_at: Timestamp) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn conversation(&self) -> Result<Conversation> {
        route(&self.recipient, self.group_id)
    }
}

impl PayloadRecord for User {}
impl PayloadRecord for Group {}
impl PayloadRecord for Channel {}
impl PayloadRecord for Invitation {}
impl PayloadRecord for JoinRequest {}
impl PayloadRecord for Message {}
impl PayloadRecord for AudioFile {}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_owner_is_first_member() {
        let mut group = Group::new(1, "rustaceans", "alice");
        assert!(!group.add_member("alice"));
        assert!(group.add_member("bob"));
        assert_eq!(group.members.as_slice(), ["alice", "bob"]);
    }

    #[test]
    fn test_member_set_deserialization_drops_duplicates() {
        let set: MemberSet = serde_json::from_str(r#"["a","b","a","c","b"]"#).unwrap();
        assert_eq!(set.as_slice(), ["a", "b", "c"]);
    }

    #[test]
    fn test_message_routing() {
        let dm = Message::private("alice", "bob", "hi");
        assert_eq!(
            dm.conversation().unwrap(),
            Conversation::Private { peer: "bob".into() }
        );

        let mut broken = Message::group("alice", 4, "hi");
        broken.recipient = Some("bob".into());
        assert!(broken.conversation().is_err());
    }

    #[test]
    fn test_audio_bytes_travel_as_base64() {
        let clip = AudioFile::private("alice", "bob", vec![0, 1, 2, 255], AudioFormat::Pcm16, 0.5);
        let payload = clip.to_payload().unwrap();
        assert_eq!(payload.get_str("data"), Some("AAEC/w=="));
        assert_eq!(payload.get_str("format"), Some("pcm16"));

        let back = AudioFile::from_payload(&payload).unwrap();
        assert_eq!(back.data, vec![0, 1, 2, 255]);
    }

    #[test]
    fn test_optional_fields_are_absent_not_null() {
        let payload = Message::group("alice", 9, "hey").to_payload().unwrap();
        assert!(!payload.contains_key("recipient"));
        assert!(!payload.contains_key("id"));
        assert_eq!(payload.get_i64("group_id"), Some(9));
    }
}
