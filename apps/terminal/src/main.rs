use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    ClientEvent, MessagingClient, NotificationPermission, PlatformNote, PlatformNotifier, RestApi,
    WsTransport,
};
use shared::domain::{ConversationId, Role, UserId, UserRef};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::warn;

mod settings;

use settings::load_settings;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    display_name: String,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    auth_token: Option<String>,
}

/// Prints would-be OS notifications to the terminal.
struct ConsoleNotifier;

impl PlatformNotifier for ConsoleNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn is_foreground(&self) -> bool {
        false
    }

    fn notify(&self, note: &PlatformNote) -> Result<()> {
        println!("[notify] {}: {}", note.title, note.body);
        Ok(())
    }

    fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings();
    let server_url = args.server_url.unwrap_or(settings.server_url);
    let auth_token = args.auth_token.unwrap_or(settings.auth_token);

    let current_user = UserRef {
        id: UserId(args.user_id),
        display_name: args.display_name,
        role: Role::Agent,
    };
    let api = Arc::new(RestApi::new(server_url.clone(), current_user.id));
    let transport = Arc::new(WsTransport::new(&server_url)?);
    let client = MessagingClient::new_with_dependencies(
        current_user,
        api,
        transport,
        Arc::new(ConsoleNotifier),
    );

    client.connect(&auth_token).await?;
    if let Err(err) = client.refresh_conversations().await {
        warn!("initial conversation refresh failed: {err}");
    }

    {
        let mut events = client.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    ClientEvent::ConnectivityChanged(connected) => {
                        println!("[net] connected={connected}");
                    }
                    ClientEvent::MessagesUpdated {
                        conversation_id,
                        messages,
                    } => {
                        if let Some(last) = messages.last() {
                            println!(
                                "[{}] {}: {}",
                                conversation_id.0, last.sender.display_name, last.text
                            );
                        }
                    }
                    ClientEvent::UnreadChanged { total, .. } => {
                        println!("[unread] total={total}");
                    }
                    ClientEvent::Error(message) => println!("[error] {message}"),
                    _ => {}
                }
            }
        });
    }

    println!(
        "commands: /conversations | /open <id> | /read <id> | /read-all | /send <user_id> <text> | /quit"
    );
    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            "/quit" => break,
            "/conversations" => {
                for conversation in client.conversations().await {
                    let peer = conversation
                        .peer_of(client.current_user().id)
                        .map(|p| p.display_name.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{}  {}  {}",
                        conversation.id.0,
                        peer,
                        conversation.last_message_preview.as_deref().unwrap_or("")
                    );
                }
            }
            "/open" => match rest.parse::<i64>() {
                Ok(id) => {
                    match client
                        .set_active_conversation(Some(ConversationId(id)))
                        .await
                    {
                        Ok(messages) => {
                            for message in messages {
                                println!("{}: {}", message.sender.display_name, message.text);
                            }
                        }
                        Err(err) => println!("[error] {err}"),
                    }
                }
                Err(_) => println!("usage: /open <conversation_id>"),
            },
            "/read" => match rest.parse::<i64>() {
                Ok(id) => client.mark_conversation_read(ConversationId(id)).await,
                Err(_) => println!("usage: /read <conversation_id>"),
            },
            "/read-all" => client.mark_all_read().await,
            "/send" => {
                let Some((user_id, text)) = rest.split_once(' ') else {
                    println!("usage: /send <user_id> <text>");
                    continue;
                };
                match user_id.parse::<i64>() {
                    Ok(peer) => {
                        let request = client.compose_to_peer(UserId(peer), text.trim()).await;
                        match client.send_message(request).await {
                            Ok(result) => println!("sent #{}", result.message.id.0),
                            Err(err) => println!("[error] draft kept: {err}"),
                        }
                    }
                    Err(_) => println!("usage: /send <user_id> <text>"),
                }
            }
            _ => println!("unknown command: {command}"),
        }
    }

    client.disconnect().await;
    Ok(())
}
