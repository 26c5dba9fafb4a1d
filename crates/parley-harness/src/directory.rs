//! Server-side state of the mock: accounts, tokens, groups and stored messages
//!
//! Request handling here is synchronous and pure with respect to I/O. The
//! connection layer turns an [`Outcome`] into a response frame plus pushes.

use std::collections::{HashMap, HashSet};

use parley_core::factory::keys;
use parley_core::{
    AudioFile, Event, EventKind, Group, Message, OperationKind, Payload, PayloadRecord, Request,
    Response, StatusCode, Timestamp, User,
};
use serde_json::{json, Value};

/// Who receives a pushed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    User(String),
    Users(Vec<String>),
    /// Every logged-in connection except the named user's
    OthersThan(String),
    /// Every connection, logged in or not
    Everyone,
}

/// Change to the calling connection's login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginChange {
    Unchanged,
    LoggedIn(String),
    LoggedOut,
}

#[derive(Debug)]
pub struct Outcome {
    pub response: Response,
    pub pushes: Vec<(Audience, Event)>,
    pub login: LoginChange,
}

impl Outcome {
    fn reply(response: Response) -> Self {
        Self {
            response,
            pushes: Vec::new(),
            login: LoginChange::Unchanged,
        }
    }

    fn push(mut self, audience: Audience, event: Event) -> Self {
        self.pushes.push((audience, event));
        self
    }
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password: String,
}

/// Accounts, sessions and conversations known to the mock server
#[derive(Debug, Default)]
pub struct Directory {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    online: HashSet<String>,
    groups: HashMap<i64, Group>,
    messages: Vec<Message>,
    next_id: i64,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Create an account directly, bypassing the protocol
    pub fn add_account(&mut self, username: &str, password: &str) -> User {
        let user = User::new(self.mint_id(), username);
        self.accounts.insert(
            username.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.online.contains(username)
    }

    /// Forget a user's tokens and online flag after their connection dropped
    pub fn drop_login(&mut self, username: &str) -> bool {
        self.tokens.retain(|_, owner| owner != username);
        self.online.remove(username)
    }

    /// Handle one request; the caller is identified by its auth token
    pub fn handle(&mut self, request: &Request) -> Outcome {
        let caller = request
            .auth_token
            .as_deref()
            .and_then(|token| self.tokens.get(token))
            .cloned();

        if request.kind.requires_auth() && caller.is_none() {
            return Outcome::reply(Response::failure(
                StatusCode::Unauthorized,
                "authentication required",
            ));
        }

        let payload = &request.payload;
        match (request.kind, caller) {
            (OperationKind::Register, _) => self.register(payload),
            (OperationKind::Login, _) => self.login(payload),
            (OperationKind::Ping, _) => Outcome::reply(Response::ok(
                Payload::new().with_opt(keys::ECHO, payload.get(keys::ECHO).cloned()),
            )),
            (OperationKind::Logout, Some(user)) => self.logout(request, user),
            (OperationKind::ListOnlineUsers, Some(_)) => {
                let users: Vec<User> = self
                    .accounts
                    .values()
                    .filter(|account| self.online.contains(&account.user.username))
                    .map(|account| User {
                        online: true,
                        ..account.user.clone()
                    })
                    .collect();
                list_reply(keys::USERS, &users)
            }
            (OperationKind::ListUsers, Some(_)) => {
                let query = payload.get_str(keys::QUERY).unwrap_or_default();
                let users: Vec<User> = self
                    .accounts
                    .values()
                    .filter(|account| account.user.username.contains(query))
                    .map(|account| self.with_presence(&account.user))
                    .collect();
                list_reply(keys::USERS, &users)
            }
            (OperationKind::GetUserProfile, Some(_)) => {
                let username = payload.get_str(keys::USERNAME).unwrap_or_default();
                match self.accounts.get(username) {
                    Some(account) => record_reply(keys::USER, &self.with_presence(&account.user)),
                    None => not_found(format!("no user '{}'", username)),
                }
            }
            (OperationKind::UpdateProfile, Some(user)) => self.update_profile(payload, &user),
            (OperationKind::SendPrivateMessage, Some(user)) => {
                self.send_private_message(payload, user)
            }
            (OperationKind::SendPrivateAudio, Some(user)) => self.send_private_audio(payload, user),
            (OperationKind::SendGroupMessage, Some(user)) => self.send_group_message(payload, user),
            (OperationKind::SendGroupAudio, Some(user)) => self.send_group_audio(payload, user),
            (OperationKind::GetPrivateHistory, Some(user)) => {
                let peer = payload.get_str(keys::PEER).unwrap_or_default();
                let history: Vec<Message> = self
                    .messages
                    .iter()
                    .filter(|m| {
                        (m.sender == user && m.recipient.as_deref() == Some(peer))
                            || (m.sender == peer && m.recipient.as_deref() == Some(user.as_str()))
                    })
                    .cloned()
                    .collect();
                list_reply(keys::MESSAGES, &history)
            }
            (OperationKind::GetGroupHistory, Some(_)) => {
                let group_id = payload.get_i64(keys::GROUP_ID);
                let history: Vec<Message> = self
                    .messages
                    .iter()
                    .filter(|m| m.group_id.is_some() && m.group_id == group_id)
                    .cloned()
                    .collect();
                list_reply(keys::MESSAGES, &history)
            }
            (OperationKind::CreateGroup, Some(user)) => {
                let Some(name) = payload.get_str(keys::NAME).map(str::to_string) else {
                    return client_error("missing group name");
                };
                let group = Group::new(self.mint_id(), name, user);
                self.groups.insert(group.id, group.clone());
                match Payload::new().with_serialized(keys::GROUP, &group) {
                    Ok(payload) => Outcome::reply(Response::created(payload)),
                    Err(e) => server_error(e),
                }
            }
            (OperationKind::ListGroups, Some(user)) => {
                let mut groups: Vec<Group> = self
                    .groups
                    .values()
                    .filter(|g| g.members.contains(&user))
                    .cloned()
                    .collect();
                groups.sort_by_key(|g| g.id);
                list_reply(keys::GROUPS, &groups)
            }
            (OperationKind::ListGroupMembers, Some(_)) => {
                let group_id = payload.get_i64(keys::GROUP_ID).unwrap_or_default();
                match self.groups.get(&group_id) {
                    Some(group) => record_reply(keys::MEMBERS, &group.members),
                    None => not_found(format!("no group {}", group_id)),
                }
            }
            (OperationKind::LeaveGroup, Some(user)) => {
                let group_id = payload.get_i64(keys::GROUP_ID).unwrap_or_default();
                match self.groups.get_mut(&group_id).map(|group| group.remove_member(&user)) {
                    Some(true) => Outcome::reply(Response::ok(Payload::new())),
                    Some(false) => client_error("not a member"),
                    None => not_found(format!("no group {}", group_id)),
                }
            }
            (OperationKind::Broadcast, Some(user)) => {
                let content = payload.get_str(keys::CONTENT).unwrap_or_default();
                let event = Event::new(
                    EventKind::Broadcast,
                    json!({ "sender": user, "content": content }),
                );
                Outcome::reply(Response::ok(Payload::new())).push(Audience::Everyone, event)
            }
            (kind, _) => client_error(format!("{} is not supported by the mock server", kind)),
        }
    }

    /// Create a group directly, bypassing the protocol
    pub fn create_group(&mut self, name: &str, owner: &str) -> i64 {
        let group = Group::new(self.mint_id(), name, owner);
        let id = group.id;
        self.groups.insert(id, group);
        id
    }

    /// Add `username` to a group, bypassing invitations
    pub fn join_group(&mut self, group_id: i64, username: &str) -> bool {
        self.groups
            .get_mut(&group_id)
            .map(|group| group.add_member(username))
            .unwrap_or(false)
    }

    fn with_presence(&self, user: &User) -> User {
        User {
            online: self.online.contains(&user.username),
            ..user.clone()
        }
    }

    fn register(&mut self, payload: &Payload) -> Outcome {
        let (Some(username), Some(password)) =
            (payload.get_str(keys::USERNAME), payload.get_str(keys::PASSWORD))
        else {
            return client_error("username and password are required");
        };
        if username.is_empty() {
            return client_error("username is empty");
        }
        if self.accounts.contains_key(username) {
            return client_error(format!("user '{}' already exists", username));
        }

        let (username, password) = (username.to_string(), password.to_string());
        let display_name = payload.get_str(keys::DISPLAY_NAME).map(str::to_string);
        let mut user = self.add_account(&username, &password);
        if let Some(account) = self.accounts.get_mut(&username) {
            account.user.display_name = display_name;
            user = account.user.clone();
        }

        match Payload::new().with_serialized(keys::USER, &user) {
            Ok(payload) => Outcome::reply(Response::created(payload)),
            Err(e) => server_error(e),
        }
    }

    fn login(&mut self, payload: &Payload) -> Outcome {
        let username = payload.get_str(keys::USERNAME).unwrap_or_default();
        let password = payload.get_str(keys::PASSWORD).unwrap_or_default();
        let Some(account) = self.accounts.get(username) else {
            return Outcome::reply(Response::failure(StatusCode::Unauthorized, "unknown user"));
        };
        if account.password != password {
            return Outcome::reply(Response::failure(StatusCode::Unauthorized, "wrong password"));
        }

        let user_id = account.user.id;
        let username = username.to_string();
        let token = uuid::Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), username.clone());
        self.online.insert(username.clone());

        let online = Event::new(EventKind::UserOnline, json!({ "username": username }));
        Outcome {
            response: Response::ok(
                Payload::new()
                    .with(keys::TOKEN, token)
                    .with(keys::USER_ID, user_id),
            ),
            pushes: vec![(Audience::OthersThan(username.clone()), online)],
            login: LoginChange::LoggedIn(username),
        }
    }

    fn logout(&mut self, request: &Request, username: String) -> Outcome {
        if let Some(token) = &request.auth_token {
            self.tokens.remove(token);
        }
        self.online.remove(&username);

        let offline = Event::new(EventKind::UserOffline, json!({ "username": username }));
        Outcome {
            response: Response::ok(Payload::new()),
            pushes: vec![(Audience::OthersThan(username), offline)],
            login: LoginChange::LoggedOut,
        }
    }

    fn update_profile(&mut self, payload: &Payload, username: &str) -> Outcome {
        if !payload.contains_key(keys::DISPLAY_NAME) {
            return client_error("display_name is required");
        }
        let display_name = payload.get_str(keys::DISPLAY_NAME).map(str::to_string);
        match self.accounts.get_mut(username) {
            Some(account) => {
                account.user.display_name = display_name;
                let user = account.user.clone();
                record_reply(keys::USER, &self.with_presence(&user))
            }
            None => not_found(format!("no user '{}'", username)),
        }
    }

    fn send_private_message(&mut self, payload: &Payload, sender: String) -> Outcome {
        let mut message = match Message::from_payload(payload) {
            Ok(message) => message,
            Err(e) => return client_error(e.to_string()),
        };
        let Some(recipient) = message.recipient.clone() else {
            return client_error("private message needs a recipient");
        };
        if message.group_id.is_some() {
            return client_error("private message must not name a group");
        }
        if !self.accounts.contains_key(&recipient) {
            return not_found(format!("no user '{}'", recipient));
        }

        message.sender = sender;
        message.id = Some(self.mint_id());
        self.messages.push(message.clone());
        deliver(EventKind::PrivateMessage, &message, Audience::User(recipient), message.id)
    }

    fn send_private_audio(&mut self, payload: &Payload, sender: String) -> Outcome {
        let mut audio = match AudioFile::from_payload(payload) {
            Ok(audio) => audio,
            Err(e) => return client_error(e.to_string()),
        };
        let Some(recipient) = audio.recipient.clone() else {
            return client_error("private audio needs a recipient");
        };
        if !self.accounts.contains_key(&recipient) {
            return not_found(format!("no user '{}'", recipient));
        }

        audio.sender = sender;
        audio.id = Some(self.mint_id());
        deliver(EventKind::PrivateAudio, &audio, Audience::User(recipient), audio.id)
    }

    fn send_group_message(&mut self, payload: &Payload, sender: String) -> Outcome {
        let mut message = match Message::from_payload(payload) {
            Ok(message) => message,
            Err(e) => return client_error(e.to_string()),
        };
        let audience = match self.group_audience(message.group_id, &sender) {
            Ok(audience) => audience,
            Err(outcome) => return outcome,
        };

        message.sender = sender;
        message.id = Some(self.mint_id());
        self.messages.push(message.clone());
        deliver(EventKind::GroupMessage, &message, audience, message.id)
    }

    fn send_group_audio(&mut self, payload: &Payload, sender: String) -> Outcome {
        let mut audio = match AudioFile::from_payload(payload) {
            Ok(audio) => audio,
            Err(e) => return client_error(e.to_string()),
        };
        let audience = match self.group_audience(audio.group_id, &sender) {
            Ok(audience) => audience,
            Err(outcome) => return outcome,
        };

        audio.sender = sender;
        audio.id = Some(self.mint_id());
        deliver(EventKind::GroupAudio, &audio, audience, audio.id)
    }

    fn group_audience(&self, group_id: Option<i64>, sender: &str) -> Result<Audience, Outcome> {
        let Some(group_id) = group_id else {
            return Err(client_error("group message needs a group_id"));
        };
        let Some(group) = self.groups.get(&group_id) else {
            return Err(not_found(format!("no group {}", group_id)));
        };
        if !group.members.contains(sender) {
            return Err(client_error(format!("'{}' is not a member of group {}", sender, group_id)));
        }
        Ok(Audience::Users(
            group
                .members
                .iter()
                .filter(|member| *member != sender)
                .map(str::to_string)
                .collect(),
        ))
    }
}

fn deliver<T: PayloadRecord>(
    kind: EventKind,
    record: &T,
    audience: Audience,
    id: Option<i64>,
) -> Outcome {
    let value = match serde_json::to_value(record) {
        Ok(value) => value,
        Err(e) => return server_error(e),
    };
    let event = Event::new(kind, value);
    let payload = Payload::new().with_opt(keys::MESSAGE_ID, id);
    Outcome::reply(Response::ok(payload)).push(audience, event)
}

fn list_reply<T: serde::Serialize>(key: &str, items: &[T]) -> Outcome {
    match Payload::new().with_serialized(key, &items) {
        Ok(payload) => Outcome::reply(Response::ok(payload)),
        Err(e) => server_error(e),
    }
}

fn record_reply<T: serde::Serialize>(key: &str, record: &T) -> Outcome {
    match Payload::new().with_serialized(key, record) {
        Ok(payload) => Outcome::reply(Response::ok(payload)),
        Err(e) => server_error(e),
    }
}

fn client_error(message: impl Into<String>) -> Outcome {
    Outcome::reply(Response::failure(StatusCode::ClientError, message))
}

fn not_found(message: impl Into<String>) -> Outcome {
    Outcome::reply(Response::failure(StatusCode::NotFound, message))
}

fn server_error(err: impl std::fmt::Display) -> Outcome {
    Outcome::reply(Response::failure(StatusCode::ServerError, err.to_string()))
}

/// Wall-clock helper for events the harness pushes on its own
pub fn stamped(kind: EventKind, payload: Value) -> Event {
    Event::at(kind, payload, Timestamp::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{RequestFactory, ResponseReader};

    fn logged_in(directory: &mut Directory, username: &str) -> String {
        directory.add_account(username, "pw");
        let outcome = directory.handle(&RequestFactory::login(username, "pw"));
        outcome.response.payload.get_str(keys::TOKEN).unwrap().to_string()
    }

    #[test]
    fn test_auth_required_without_token() {
        let mut directory = Directory::new();
        let outcome = directory.handle(&RequestFactory::list_online_users());
        assert_eq!(outcome.response.status_code, StatusCode::Unauthorized);
        assert!(!outcome.response.success);
    }

    #[test]
    fn test_private_message_is_pushed_to_recipient() {
        let mut directory = Directory::new();
        let token = logged_in(&mut directory, "alice");
        directory.add_account("bob", "pw");

        let request = RequestFactory::send_private_message(&Message::private("alice", "bob", "hi"))
            .unwrap()
            .with_auth(token, None);
        let outcome = directory.handle(&request);

        assert!(outcome.response.success);
        assert_eq!(outcome.pushes.len(), 1);
        assert_eq!(outcome.pushes[0].0, Audience::User("bob".to_string()));
        assert_eq!(outcome.pushes[0].1.kind, EventKind::PrivateMessage);
    }

    #[test]
    fn test_logout_revokes_token() {
        let mut directory = Directory::new();
        let token = logged_in(&mut directory, "alice");
        assert!(directory.is_online("alice"));

        let outcome = directory.handle(&RequestFactory::logout().with_auth(token.clone(), None));
        assert_eq!(outcome.login, LoginChange::LoggedOut);
        assert!(!directory.is_online("alice"));

        let after = directory.handle(&RequestFactory::list_online_users().with_auth(token, None));
        assert_eq!(after.response.status_code, StatusCode::Unauthorized);
    }

    #[test]
    fn test_list_replies_decode_on_the_client_side() {
        let mut directory = Directory::new();
        let token = logged_in(&mut directory, "alice");
        let group_id = directory.create_group("ops", "alice");

        let outcome =
            directory.handle(&RequestFactory::list_online_users().with_auth(token.clone(), None));
        let users = ResponseReader::users(&outcome.response).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");

        let outcome = directory.handle(&RequestFactory::list_groups().with_auth(token, None));
        let groups = ResponseReader::groups(&outcome.response).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, group_id);
        assert_eq!(groups[0].owner, "alice");
    }
}
