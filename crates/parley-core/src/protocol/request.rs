//! Request envelope and the closed operation catalog

use core::fmt;
use serde::{Deserialize, Serialize};

use super::Payload;

// ----------------------------------------------------------------------------
// Operation Kind
// ----------------------------------------------------------------------------

/// Every operation a client can ask the server to perform
///
/// The payload keys each kind carries are documented on the matching
/// constructor in [`crate::factory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    // Account and presence
    Register,
    Login,
    Logout,
    Ping,
    ListOnlineUsers,
    ListUsers,
    GetUserProfile,
    UpdateProfile,

    // Messaging
    SendPrivateMessage,
    SendGroupMessage,
    SendPrivateAudio,
    SendGroupAudio,
    GetPrivateHistory,
    GetGroupHistory,

    // Groups
    CreateGroup,
    LeaveGroup,
    ListGroups,
    ListGroupMembers,
    SendInvitation,
    RespondInvitation,
    ListInvitations,
    SendJoinRequest,
    RespondJoinRequest,
    ListJoinRequests,

    // Channels
    CreateChannel,
    DeleteChannel,
    ListChannels,
    SubscribeChannel,
    UnsubscribeChannel,
    PostChannelMessage,
    Broadcast,
}

impl OperationKind {
    /// The complete catalog, in declaration order
    pub const ALL: [OperationKind; 31] = [
        OperationKind::Register,
        OperationKind::Login,
        OperationKind::Logout,
        OperationKind::Ping,
        OperationKind::ListOnlineUsers,
        OperationKind::ListUsers,
        OperationKind::GetUserProfile,
        OperationKind::UpdateProfile,
        OperationKind::SendPrivateMessage,
        OperationKind::SendGroupMessage,
        OperationKind::SendPrivateAudio,
        OperationKind::SendGroupAudio,
        OperationKind::GetPrivateHistory,
        OperationKind::GetGroupHistory,
        OperationKind::CreateGroup,
        OperationKind::LeaveGroup,
        OperationKind::ListGroups,
        OperationKind::ListGroupMembers,
        OperationKind::SendInvitation,
        OperationKind::RespondInvitation,
        OperationKind::ListInvitations,
        OperationKind::SendJoinRequest,
        OperationKind::RespondJoinRequest,
        OperationKind::ListJoinRequests,
        OperationKind::CreateChannel,
        OperationKind::DeleteChannel,
        OperationKind::ListChannels,
        OperationKind::SubscribeChannel,
        OperationKind::UnsubscribeChannel,
        OperationKind::PostChannelMessage,
        OperationKind::Broadcast,
    ];

    /// Whether the server only accepts this operation from an authenticated session
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            OperationKind::Register | OperationKind::Login | OperationKind::Ping
        )
    }

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Register => "REGISTER",
            OperationKind::Login => "LOGIN",
            OperationKind::Logout => "LOGOUT",
            OperationKind::Ping => "PING",
            OperationKind::ListOnlineUsers => "LIST_ONLINE_USERS",
            OperationKind::ListUsers => "LIST_USERS",
            OperationKind::GetUserProfile => "GET_USER_PROFILE",
            OperationKind::UpdateProfile => "UPDATE_PROFILE",
            OperationKind::SendPrivateMessage => "SEND_PRIVATE_MESSAGE",
            OperationKind::SendGroupMessage => "SEND_GROUP_MESSAGE",
            OperationKind::SendPrivateAudio => "SEND_PRIVATE_AUDIO",
            OperationKind::SendGroupAudio => "SEND_GROUP_AUDIO",
            OperationKind::GetPrivateHistory => "GET_PRIVATE_HISTORY",
            OperationKind::GetGroupHistory => "GET_GROUP_HISTORY",
            OperationKind::CreateGroup => "CREATE_GROUP",
            OperationKind::LeaveGroup => "LEAVE_GROUP",
            OperationKind::ListGroups => "LIST_GROUPS",
            OperationKind::ListGroupMembers => "LIST_GROUP_MEMBERS",
            OperationKind::SendInvitation => "SEND_INVITATION",
            OperationKind::RespondInvitation => "RESPOND_INVITATION",
            OperationKind::ListInvitations => "LIST_INVITATIONS",
            OperationKind::SendJoinRequest => "SEND_JOIN_REQUEST",
            OperationKind::RespondJoinRequest => "RESPOND_JOIN_REQUEST",
            OperationKind::ListJoinRequests => "LIST_JOIN_REQUESTS",
            OperationKind::CreateChannel => "CREATE_CHANNEL",
            OperationKind::DeleteChannel => "DELETE_CHANNEL",
            OperationKind::ListChannels => "LIST_CHANNELS",
            OperationKind::SubscribeChannel => "SUBSCRIBE_CHANNEL",
            OperationKind::UnsubscribeChannel => "UNSUBSCRIBE_CHANNEL",
            OperationKind::PostChannelMessage => "POST_CHANNEL_MESSAGE",
            OperationKind::Broadcast => "BROADCAST",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Request
// ----------------------------------------------------------------------------

/// A caller-initiated call
///
/// The session fills `auth_token` and `user_id` from its auth context when
/// they are left empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub kind: OperationKind,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl Request {
    pub fn new(kind: OperationKind, payload: Payload) -> Self {
        Self {
            kind,
            payload,
            auth_token: None,
            user_id: None,
        }
    }

    /// Request with an empty payload
    pub fn bare(kind: OperationKind) -> Self {
        Self::new(kind, Payload::new())
    }

    pub fn with_auth(mut self, token: impl Into<String>, user_id: Option<i64>) -> Self {
        self.auth_token = Some(token.into());
        self.user_id = user_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        for kind in OperationKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::from(kind.as_str()));
        }
    }

    #[test]
    fn test_only_account_bootstrap_is_anonymous() {
        let anonymous: Vec<_> = OperationKind::ALL
            .iter()
            .filter(|kind| !kind.requires_auth())
            .collect();
        assert_eq!(
            anonymous,
            vec![&OperationKind::Register, &OperationKind::Login, &OperationKind::Ping]
        );
    }

    #[test]
    fn test_unset_auth_is_omitted_on_the_wire() {
        let json = serde_json::to_value(Request::bare(OperationKind::Ping)).unwrap();
        assert!(json.get("auth_token").is_none());
        assert!(json.get("user_id").is_none());
    }
}
