//! Command handlers for the Parley CLI

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_client::{ChatClient, LogEntry};
use parley_core::{
    ChannelSubscriber, Event, EventKind, ParleyConfig, RequestFactory, Response, ResponseReader,
    Subscriber,
};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command against a fresh client
    pub async fn execute(cli: Cli, config: ParleyConfig) -> Result<()> {
        let client = ChatClient::new(config).await?;
        client.connect().await?;

        let outcome = match &cli.command {
            Commands::Ping { echo } => Self::handle_ping_command(&client, echo.as_deref()).await,
            Commands::Register { display_name } => {
                Self::handle_register_command(&client, &cli, display_name.as_deref()).await
            }
            Commands::Users => Self::handle_users_command(&client, &cli).await,
            Commands::Groups => Self::handle_groups_command(&client, &cli).await,
            Commands::Send { to, group, message } => {
                Self::handle_send_command(&client, &cli, to.as_deref(), *group, message).await
            }
            Commands::Listen { seconds } => {
                Self::handle_listen_command(&client, &cli, *seconds).await
            }
            Commands::History { with, group } => {
                Self::handle_history_command(&client, &cli, with.as_deref(), *group).await
            }
            Commands::Purge { days } => Self::handle_purge_command(&client, &cli, *days).await,
        };

        if client.username().is_some() {
            if let Err(e) = client.logout().await {
                warn!("Logout failed: {}", e);
            }
        }
        client.shutdown().await;
        outcome
    }

    async fn handle_ping_command(client: &ChatClient, echo: Option<&str>) -> Result<()> {
        let started = Instant::now();
        let response = client.call(RequestFactory::ping(echo)).await?;
        let response = accepted("ping", response)?;
        println!(
            "pong from {} in {}ms{}",
            client.config().server.address(),
            started.elapsed().as_millis(),
            response
                .payload
                .get_str("echo")
                .map(|e| format!(": {}", e))
                .unwrap_or_default()
        );
        Ok(())
    }

    async fn handle_register_command(
        client: &ChatClient,
        cli: &Cli,
        display_name: Option<&str>,
    ) -> Result<()> {
        let (username, password) = credentials(cli)?;
        let response = client
            .call(RequestFactory::register(username, password, display_name))
            .await?;
        accepted("registration", response)?;
        println!("Registered {}", username);
        Ok(())
    }

    async fn handle_users_command(client: &ChatClient, cli: &Cli) -> Result<()> {
        login(client, cli).await?;
        let response = client.call(RequestFactory::list_online_users()).await?;
        let response = accepted("user list", response)?;
        let users = ResponseReader::users(&response)?;
        println!("{} online:", users.len());
        for user in users {
            match &user.display_name {
                Some(name) => println!("  {} ({})", user.username, name),
                None => println!("  {}", user.username),
            }
        }
        Ok(())
    }

    async fn handle_groups_command(client: &ChatClient, cli: &Cli) -> Result<()> {
        login(client, cli).await?;
        let response = accepted("group list", client.call(RequestFactory::list_groups()).await?)?;
        for group in ResponseReader::groups(&response)? {
            println!(
                "  [{}] {} (owner {}, {} members)",
                group.id,
                group.name,
                group.owner,
                group.members.len()
            );
        }
        Ok(())
    }

    async fn handle_send_command(
        client: &ChatClient,
        cli: &Cli,
        to: Option<&str>,
        group: Option<i64>,
        message: &str,
    ) -> Result<()> {
        login(client, cli).await?;
        let response = match (to, group) {
            (Some(recipient), None) => client.send_private_message(recipient, message).await?,
            (None, Some(group_id)) => client.send_group_message(group_id, message).await?,
            _ => {
                return Err(CliError::Config(
                    "send needs exactly one of --to or --group".to_string(),
                ))
            }
        };
        let response = accepted("message", response)?;
        match ResponseReader::message_id(&response)? {
            Some(id) => println!("Sent message {}", id),
            None => println!("Sent"),
        }
        Ok(())
    }

    async fn handle_listen_command(
        client: &ChatClient,
        cli: &Cli,
        seconds: Option<u64>,
    ) -> Result<()> {
        let (subscriber, mut events) = ChannelSubscriber::new("cli-listener");
        let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);
        client.bus().subscribe(Arc::clone(&subscriber));
        login(client, cli).await?;
        info!("Listening for events");

        let limit = seconds.map(Duration::from_secs).unwrap_or(Duration::MAX);
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        println!("{}", describe_event(&event));
                        if event.kind == EventKind::ForcedDisconnect {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        client.bus().unsubscribe(&subscriber);
        Ok(())
    }

    async fn handle_history_command(
        client: &ChatClient,
        cli: &Cli,
        with: Option<&str>,
        group: Option<i64>,
    ) -> Result<()> {
        login(client, cli).await?;
        let entries = match (with, group) {
            (Some(peer), None) => client.conversation_with(peer).await?,
            (None, Some(group_id)) => client.group_log(group_id).await?,
            _ => {
                return Err(CliError::Config(
                    "history needs exactly one of --with or --group".to_string(),
                ))
            }
        };
        if entries.is_empty() {
            println!("No local history");
        }
        for entry in &entries {
            println!("{}", describe_entry(entry));
        }
        Ok(())
    }

    async fn handle_purge_command(client: &ChatClient, cli: &Cli, days: u32) -> Result<()> {
        login(client, cli).await?;
        let removed = client.purge_history(days).await?;
        println!("Removed {} entries older than {} days", removed, days);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn credentials(cli: &Cli) -> Result<(&str, &str)> {
    match (cli.user.as_deref(), cli.password.as_deref()) {
        (Some(user), Some(password)) => Ok((user, password)),
        _ => Err(CliError::MissingCredentials(
            "pass --user and --password".to_string(),
        )),
    }
}

async fn login(client: &ChatClient, cli: &Cli) -> Result<()> {
    let (username, password) = credentials(cli)?;
    accepted("login", client.login(username, password).await?)?;
    info!("Logged in as {}", username);
    Ok(())
}

fn accepted(operation: &str, response: Response) -> Result<Response> {
    if response.success {
        Ok(response)
    } else {
        Err(CliError::Rejected {
            operation: operation.to_string(),
            message: format!("{} {}", response.status_code, response.message),
        })
    }
}

fn describe_event(event: &Event) -> String {
    let sender = event.payload.get("sender").and_then(|v| v.as_str());
    let content = event.payload.get("content").and_then(|v| v.as_str());
    match (sender, content) {
        (Some(sender), Some(content)) => format!("[{}] {}: {}", event.kind, sender, content),
        _ => format!("[{}] {}", event.kind, event.payload),
    }
}

fn describe_entry(entry: &LogEntry) -> String {
    match entry {
        LogEntry::Message(message) => {
            format!("{} {}: {}", message.sent_at, message.sender, message.content)
        }
        LogEntry::Audio(audio) => format!(
            "{} {}: <{} audio, {:.1}s>",
            audio.sent_at, audio.sender, audio.format, audio.duration_seconds
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::StatusCode;
    use serde_json::json;

    #[test]
    fn test_rejected_response_becomes_error() {
        let err = accepted(
            "login",
            Response::failure(StatusCode::Unauthorized, "bad password"),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Server rejected login: UNAUTHORIZED bad password"
        );
    }

    #[test]
    fn test_describe_event() {
        let event = Event::new(
            EventKind::PrivateMessage,
            json!({ "sender": "bob", "content": "hi" }),
        );
        assert_eq!(describe_event(&event), "[PRIVATE_MESSAGE] bob: hi");

        let event = Event::new(EventKind::UserOnline, json!({ "username": "bob" }));
        assert!(describe_event(&event).starts_with("[USER_ONLINE] {"));
    }
}
