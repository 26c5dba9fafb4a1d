//! Request construction and response interpretation
//!
//! One constructor per operation kind, each documenting the payload keys it
//! sends and the keys a successful response carries. Keeping both directions
//! here is what makes payload shapes consistent between callers.

use serde::de::DeserializeOwned;

use crate::entities::{
    AudioFile, Channel, Group, Invitation, JoinRequest, MemberSet, Message, PayloadRecord, User,
};
use crate::protocol::{OperationKind, Payload, Request, Response};
use crate::types::Timestamp;
use crate::Result;

// ----------------------------------------------------------------------------
// Payload Keys
// ----------------------------------------------------------------------------

pub mod keys {
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const TOKEN: &str = "token";
    pub const USER_ID: &str = "user_id";
    pub const USER: &str = "user";
    pub const USERS: &str = "users";
    pub const QUERY: &str = "query";
    pub const ECHO: &str = "echo";
    pub const PEER: &str = "peer";
    pub const GROUP_ID: &str = "group_id";
    pub const GROUP: &str = "group";
    pub const GROUPS: &str = "groups";
    pub const NAME: &str = "name";
    pub const MEMBERS: &str = "members";
    pub const INVITEE: &str = "invitee";
    pub const INVITATION_ID: &str = "invitation_id";
    pub const INVITATION: &str = "invitation";
    pub const INVITATIONS: &str = "invitations";
    pub const REQUEST_ID: &str = "request_id";
    pub const JOIN_REQUEST: &str = "join_request";
    pub const JOIN_REQUESTS: &str = "join_requests";
    pub const ACCEPT: &str = "accept";
    pub const CHANNEL_ID: &str = "channel_id";
    pub const CHANNEL: &str = "channel";
    pub const CHANNELS: &str = "channels";
    pub const DESCRIPTION: &str = "description";
    pub const CONTENT: &str = "content";
    pub const MESSAGE_ID: &str = "message_id";
    pub const MESSAGES: &str = "messages";
    pub const SINCE: &str = "since";
    pub const LIMIT: &str = "limit";
}

// ----------------------------------------------------------------------------
// Request Factory
// ----------------------------------------------------------------------------

/// Builds one [`Request`] per operation kind
pub struct RequestFactory;

impl RequestFactory {
    /// `REGISTER`: `username`, `password`, optional `display_name`.
    /// Success (`CREATED`) carries `user`.
    pub fn register(username: &str, password: &str, display_name: Option<&str>) -> Request {
        Request::new(
            OperationKind::Register,
            Payload::new()
                .with(keys::USERNAME, username)
                .with(keys::PASSWORD, password)
                .with_opt(keys::DISPLAY_NAME, display_name),
        )
    }

    /// `LOGIN`: `username`, `password`. Success carries `token` and `user_id`.
    pub fn login(username: &str, password: &str) -> Request {
        Request::new(
            OperationKind::Login,
            Payload::new()
                .with(keys::USERNAME, username)
                .with(keys::PASSWORD, password),
        )
    }

    /// `LOGOUT`: no keys.
    pub fn logout() -> Request {
        Request::bare(OperationKind::Logout)
    }

    /// `PING`: optional `echo`, returned verbatim.
    pub fn ping(echo: Option<&str>) -> Request {
        Request::new(OperationKind::Ping, Payload::new().with_opt(keys::ECHO, echo))
    }

    /// `LIST_ONLINE_USERS`: no keys. Success carries `users`.
    pub fn list_online_users() -> Request {
        Request::bare(OperationKind::ListOnlineUsers)
    }

    /// `LIST_USERS`: optional `query` substring filter. Success carries `users`.
    pub fn list_users(query: Option<&str>) -> Request {
        Request::new(OperationKind::ListUsers, Payload::new().with_opt(keys::QUERY, query))
    }

    /// `GET_USER_PROFILE`: `username`. Success carries `user`.
    pub fn get_user_profile(username: &str) -> Request {
        Request::new(
            OperationKind::GetUserProfile,
            Payload::new().with(keys::USERNAME, username),
        )
    }

    /// `UPDATE_PROFILE`: `display_name` (null clears it). Success carries `user`.
    pub fn update_profile(display_name: Option<&str>) -> Request {
        Request::new(
            OperationKind::UpdateProfile,
            Payload::new().with(keys::DISPLAY_NAME, display_name),
        )
    }

    /// `SEND_PRIVATE_MESSAGE`: the [`Message`] record. Success carries `message_id`.
    pub fn send_private_message(message: &Message) -> Result<Request> {
        Ok(Request::new(OperationKind::SendPrivateMessage, message.to_payload()?))
    }

    /// `SEND_GROUP_MESSAGE`: the [`Message`] record. Success carries `message_id`.
    pub fn send_group_message(message: &Message) -> Result<Request> {
        Ok(Request::new(OperationKind::SendGroupMessage, message.to_payload()?))
    }

    /// `SEND_PRIVATE_AUDIO`: the [`AudioFile`] record. Success carries `message_id`.
    pub fn send_private_audio(audio: &AudioFile) -> Result<Request> {
        Ok(Request::new(OperationKind::SendPrivateAudio, audio.to_payload()?))
    }

    /// `SEND_GROUP_AUDIO`: the [`AudioFile`] record. Success carries `message_id`.
    pub fn send_group_audio(audio: &AudioFile) -> Result<Request> {
        Ok(Request::new(OperationKind::SendGroupAudio, audio.to_payload()?))
    }

    /// `GET_PRIVATE_HISTORY`: `peer`, optional `since` and `limit`.
    /// Success carries `messages`.
    pub fn get_private_history(
        peer: &str,
        since: Option<Timestamp>,
        limit: Option<u32>,
    ) -> Request {
        Request::new(
            OperationKind::GetPrivateHistory,
            Payload::new()
                .with(keys::PEER, peer)
                .with_opt(keys::SINCE, since.map(|ts| ts.as_millis()))
                .with_opt(keys::LIMIT, limit),
        )
    }

    /// `GET_GROUP_HISTORY`: `group_id`, optional `since` and `limit`.
    /// Success carries `messages`.
    pub fn get_group_history(
        group_id: i64,
        since: Option<Timestamp>,
        limit: Option<u32>,
    ) -> Request {
        Request::new(
            OperationKind::GetGroupHistory,
            Payload::new()
                .with(keys::GROUP_ID, group_id)
                .with_opt(keys::SINCE, since.map(|ts| ts.as_millis()))
                .with_opt(keys::LIMIT, limit),
        )
    }

    /// `CREATE_GROUP`: `name`. Success (`CREATED`) carries `group`.
    pub fn create_group(name: &str) -> Request {
        Request::new(OperationKind::CreateGroup, Payload::new().with(keys::NAME, name))
    }

    /// `LEAVE_GROUP`: `group_id`.
    pub fn leave_group(group_id: i64) -> Request {
        Request::new(OperationKind::LeaveGroup, Payload::new().with(keys::GROUP_ID, group_id))
    }

    /// `LIST_GROUPS`: no keys. Success carries `groups`.
    pub fn list_groups() -> Request {
        Request::bare(OperationKind::ListGroups)
    }

    /// `LIST_GROUP_MEMBERS`: `group_id`. Success carries `members`.
    pub fn list_group_members(group_id: i64) -> Request {
        Request::new(
            OperationKind::ListGroupMembers,
            Payload::new().with(keys::GROUP_ID, group_id),
        )
    }

    /// `SEND_INVITATION`: `group_id`, `invitee`. Success carries `invitation`.
    pub fn send_invitation(group_id: i64, invitee: &str) -> Request {
        Request::new(
            OperationKind::SendInvitation,
            Payload::new()
                .with(keys::GROUP_ID, group_id)
                .with(keys::INVITEE, invitee),
        )
    }

    /// `RESPOND_INVITATION`: `invitation_id`, `accept`.
    pub fn respond_invitation(invitation_id: i64, accept: bool) -> Request {
        Request::new(
            OperationKind::RespondInvitation,
            Payload::new()
                .with(keys::INVITATION_ID, invitation_id)
                .with(keys::ACCEPT, accept),
        )
    }

    /// `LIST_INVITATIONS`: no keys. Success carries `invitations`.
    pub fn list_invitations() -> Request {
        Request::bare(OperationKind::ListInvitations)
    }

    /// `SEND_JOIN_REQUEST`: `group_id`. Success carries `join_request`.
    pub fn send_join_request(group_id: i64) -> Request {
        Request::new(
            OperationKind::SendJoinRequest,
            Payload::new().with(keys::GROUP_ID, group_id),
        )
    }

    /// `RESPOND_JOIN_REQUEST`: `request_id`, `accept`.
    pub fn respond_join_request(request_id: i64, accept: bool) -> Request {
        Request::new(
            OperationKind::RespondJoinRequest,
            Payload::new()
                .with(keys::REQUEST_ID, request_id)
                .with(keys::ACCEPT, accept),
        )
    }

    /// `LIST_JOIN_REQUESTS`: optional `group_id`; absent lists every group the caller owns.
    /// Success carries `join_requests`.
    pub fn list_join_requests(group_id: Option<i64>) -> Request {
        Request::new(
            OperationKind::ListJoinRequests,
            Payload::new().with_opt(keys::GROUP_ID, group_id),
        )
    }

    /// `CREATE_CHANNEL`: `name`, optional `description`. Success (`CREATED`) carries `channel`.
    pub fn create_channel(name: &str, description: Option<&str>) -> Request {
        Request::new(
            OperationKind::CreateChannel,
            Payload::new()
                .with(keys::NAME, name)
                .with_opt(keys::DESCRIPTION, description),
        )
    }

    /// `DELETE_CHANNEL`: `channel_id`.
    pub fn delete_channel(channel_id: i64) -> Request {
        Request::new(
            OperationKind::DeleteChannel,
            Payload::new().with(keys::CHANNEL_ID, channel_id),
        )
    }

    /// `LIST_CHANNELS`: no keys. Success carries `channels`.
    pub fn list_channels() -> Request {
        Request::bare(OperationKind::ListChannels)
    }

    /// `SUBSCRIBE_CHANNEL`: `channel_id`.
    pub fn subscribe_channel(channel_id: i64) -> Request {
        Request::new(
            OperationKind::SubscribeChannel,
            Payload::new().with(keys::CHANNEL_ID, channel_id),
        )
    }

    /// `UNSUBSCRIBE_CHANNEL`: `channel_id`.
    pub fn unsubscribe_channel(channel_id: i64) -> Request {
        Request::new(
            OperationKind::UnsubscribeChannel,
            Payload::new().with(keys::CHANNEL_ID, channel_id),
        )
    }

    /// `POST_CHANNEL_MESSAGE`: `channel_id`, `content`. Success carries `message_id`.
    pub fn post_channel_message(channel_id: i64, content: &str) -> Request {
        Request::new(
            OperationKind::PostChannelMessage,
            Payload::new()
                .with(keys::CHANNEL_ID, channel_id)
                .with(keys::CONTENT, content),
        )
    }

    /// `BROADCAST`: `content`, delivered to every online user.
    pub fn broadcast(content: &str) -> Request {
        Request::new(OperationKind::Broadcast, Payload::new().with(keys::CONTENT, content))
    }
}

// ----------------------------------------------------------------------------
// Response Interpretation
// ----------------------------------------------------------------------------

/// Credentials granted by a successful login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    pub user_id: i64,
}

impl LoginGrant {
    /// Read `token` and `user_id`; a failed response becomes [`crate::ParleyError::Server`]
    pub fn from_response(response: &Response) -> Result<Self> {
        let response = response.clone().into_result()?;
        Ok(Self {
            token: response.payload.require_str(keys::TOKEN)?.to_string(),
            user_id: response.payload.require_i64(keys::USER_ID)?,
        })
    }
}

/// Interprets response payloads into entities
pub struct ResponseReader;

impl ResponseReader {
    /// Deserialize a required list under `key` from a successful response
    pub fn list<T: DeserializeOwned>(response: &Response, key: &str) -> Result<Vec<T>> {
        Self::ensure_success(response)?;
        response.payload.require_as(key)
    }

    /// Deserialize a required record under `key` from a successful response
    pub fn record<T: DeserializeOwned>(response: &Response, key: &str) -> Result<T> {
        Self::ensure_success(response)?;
        response.payload.require_as(key)
    }

    pub fn users(response: &Response) -> Result<Vec<User>> {
        Self::list(response, keys::USERS)
    }

    pub fn user(response: &Response) -> Result<User> {
        Self::record(response, keys::USER)
    }

    pub fn groups(response: &Response) -> Result<Vec<Group>> {
        Self::list(response, keys::GROUPS)
    }

    pub fn group(response: &Response) -> Result<Group> {
        Self::record(response, keys::GROUP)
    }

    pub fn members(response: &Response) -> Result<MemberSet> {
        Self::record(response, keys::MEMBERS)
    }

    pub fn channels(response: &Response) -> Result<Vec<Channel>> {
        Self::list(response, keys::CHANNELS)
    }

    pub fn channel(response: &Response) -> Result<Channel> {
        Self::record(response, keys::CHANNEL)
    }

    pub fn invitations(response: &Response) -> Result<Vec<Invitation>> {
        Self::list(response, keys::INVITATIONS)
    }

    pub fn join_requests(response: &Response) -> Result<Vec<JoinRequest>> {
        Self::list(response, keys::JOIN_REQUESTS)
    }

    pub fn messages(response: &Response) -> Result<Vec<Message>> {
        Self::list(response, keys::MESSAGES)
    }

    /// Server-assigned id of a delivered message, if the server reported one
    pub fn message_id(response: &Response) -> Result<Option<i64>> {
        Self::ensure_success(response)?;
        Ok(response.payload.get_i64(keys::MESSAGE_ID))
    }

    fn ensure_success(response: &Response) -> Result<()> {
        if response.success {
            Ok(())
        } else {
            Err(crate::ParleyError::Server {
                status: response.status_code,
                message: response.message.clone(),
            })
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;
    use crate::ParleyError;

    #[test]
    fn test_login_payload_shape() {
        let request = RequestFactory::login("alice", "secret");
        assert_eq!(request.kind, OperationKind::Login);
        assert_eq!(request.payload.get_str(keys::USERNAME), Some("alice"));
        assert_eq!(request.payload.get_str(keys::PASSWORD), Some("secret"));
        assert_eq!(request.payload.len(), 2);
    }

    #[test]
    fn test_omitted_filters_are_absent() {
        let request = RequestFactory::get_group_history(3, None, Some(50));
        assert!(!request.payload.contains_key(keys::SINCE));
        assert_eq!(request.payload.get_i64(keys::LIMIT), Some(50));

        let request = RequestFactory::list_join_requests(None);
        assert!(request.payload.is_empty());
    }

    #[test]
    fn test_clearing_display_name_sends_explicit_null() {
        let request = RequestFactory::update_profile(None);
        assert!(request.payload.is_null(keys::DISPLAY_NAME));
    }

    #[test]
    fn test_login_grant_from_response() {
        let response = Response::ok(
            Payload::new()
                .with(keys::TOKEN, "tok-1")
                .with(keys::USER_ID, 42),
        );
        let grant = LoginGrant::from_response(&response).unwrap();
        assert_eq!(grant.token, "tok-1");
        assert_eq!(grant.user_id, 42);

        let denied = Response::failure(StatusCode::Unauthorized, "bad credentials");
        assert!(matches!(
            LoginGrant::from_response(&denied),
            Err(ParleyError::Server {
                status: StatusCode::Unauthorized,
                ..
            })
        ));
    }

    #[test]
    fn test_reading_user_list() {
        let users = vec![User::new(1, "alice"), User::new(2, "bob")];
        let response = Response::ok(Payload::new().with_serialized(keys::USERS, &users).unwrap());
        assert_eq!(ResponseReader::users(&response).unwrap(), users);

        let empty = Response::ok(Payload::new());
        assert!(ResponseReader::users(&empty).is_err());
    }
}
