//! Server-initiated push notifications

use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Payload;
use crate::types::Timestamp;
use crate::Result;

/// Every kind of notification the server may push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    UserOnline,
    UserOffline,
    PrivateMessage,
    GroupMessage,
    PrivateAudio,
    GroupAudio,
    ChannelCreated,
    ChannelDeleted,
    ChannelMessage,
    InvitationReceived,
    InvitationResolved,
    JoinRequestReceived,
    JoinRequestResolved,
    Broadcast,
    /// The server is closing this session; the client tears the connection down
    ForcedDisconnect,
}

impl EventKind {
    /// Whether the event carries a conversation entry worth mirroring locally
    pub fn is_conversation_entry(&self) -> bool {
        matches!(
            self,
            EventKind::PrivateMessage
                | EventKind::GroupMessage
                | EventKind::PrivateAudio
                | EventKind::GroupAudio
                | EventKind::ChannelMessage
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::UserOnline => "USER_ONLINE",
            EventKind::UserOffline => "USER_OFFLINE",
            EventKind::PrivateMessage => "PRIVATE_MESSAGE",
            EventKind::GroupMessage => "GROUP_MESSAGE",
            EventKind::PrivateAudio => "PRIVATE_AUDIO",
            EventKind::GroupAudio => "GROUP_AUDIO",
            EventKind::ChannelCreated => "CHANNEL_CREATED",
            EventKind::ChannelDeleted => "CHANNEL_DELETED",
            EventKind::ChannelMessage => "CHANNEL_MESSAGE",
            EventKind::InvitationReceived => "INVITATION_RECEIVED",
            EventKind::InvitationResolved => "INVITATION_RESOLVED",
            EventKind::JoinRequestReceived => "JOIN_REQUEST_RECEIVED",
            EventKind::JoinRequestResolved => "JOIN_REQUEST_RESOLVED",
            EventKind::Broadcast => "BROADCAST",
            EventKind::ForcedDisconnect => "FORCED_DISCONNECT",
        };
        f.write_str(name)
    }
}

/// A push notification
///
/// The payload is opaque to the transport; subscribers interpret it through
/// the entity helpers in [`crate::entities`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: Timestamp,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Timestamp::now(),
        }
    }

    pub fn at(kind: EventKind, payload: Value, timestamp: Timestamp) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }

    /// View the payload as a key-value payload, if it is an object
    pub fn payload_map(&self) -> Result<Payload> {
        Payload::try_from(self.payload.clone())
    }
}
