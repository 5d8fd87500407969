use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use grammers_client::session::Session;
use grammers_client::types::{Chat, Media, PackedChat};
use grammers_client::{Client, Config, InvocationError, SignInError};
use log::{info, warn};

use crate::config::TelegramConfig;
use crate::error::{Result, SearchError};
use crate::source::{Channel, ChatKind, Document, Message, MessageSource};

/// `MessageSource` backed by a logged-in Telegram user session.
pub struct TelegramSource {
    client: Client,
    session_file: PathBuf,
    /// Chats seen in dialogs or resolved by name, keyed by bare id.
    known: Mutex<HashMap<i64, PackedChat>>,
}

impl TelegramSource {
    /// Connect with the stored session, logging in on the terminal if it is missing or expired.
    pub async fn connect(config: &TelegramConfig) -> Result<Self> {
        let session = Session::load_file_or_create(&config.session_file).map_err(|e| {
            SearchError::Authentication(format!(
                "cannot open session file {}: {}",
                config.session_file.display(),
                e
            ))
        })?;

        let client = Client::connect(Config {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params: Default::default(),
        })
        .await
        .map_err(|e| SearchError::SourceUnavailable(format!("cannot reach Telegram: {}", e)))?;

        let source = Self {
            client,
            session_file: config.session_file.clone(),
            known: Mutex::new(HashMap::new()),
        };
        source.ensure_authorized().await?;
        Ok(source)
    }

    /// Log in again if the session is no longer authorized.
    pub async fn ensure_authorized(&self) -> Result<()> {
        let authorized = match self.client.is_authorized().await {
            Ok(authorized) => authorized,
            Err(e) => match source_error(e) {
                SearchError::Authentication(_) => false,
                other => return Err(other),
            },
        };
        if !authorized {
            info!("Telegram session is not authorized, starting login");
            login(&self.client, &self.session_file).await?;
        }
        Ok(())
    }

    fn remember(&self, chat: &Chat) {
        if let Ok(mut known) = self.known.lock() {
            known.insert(chat.id(), chat.pack());
        }
    }

    fn packed(&self, id: i64) -> Option<PackedChat> {
        self.known.lock().ok().and_then(|known| known.get(&id).copied())
    }
}

#[async_trait]
impl MessageSource for TelegramSource {
    async fn channels(&self) -> Result<Vec<Channel>> {
        let mut dialogs = self.client.iter_dialogs();
        let mut channels = Vec::new();
        while let Some(dialog) = dialogs.next().await.map_err(source_error)? {
            let chat = dialog.chat();
            if let Some(channel) = channel_from_chat(chat) {
                self.remember(chat);
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    async fn resolve(&self, handle: &str) -> Result<Channel> {
        let handle = handle.trim().trim_start_matches('@');

        if let Ok(id) = handle.parse::<i64>() {
            let wanted = id.unsigned_abs() as i64;
            let bare = if wanted > 1_000_000_000_000 {
                wanted - 1_000_000_000_000
            } else {
                wanted
            };
            return self
                .channels()
                .await?
                .into_iter()
                .find(|c| c.id == bare)
                .ok_or_else(|| SearchError::ChatNotFound(handle.to_string()));
        }

        let chat = self
            .client
            .resolve_username(handle)
            .await
            .map_err(source_error)?
            .ok_or_else(|| SearchError::ChatNotFound(handle.to_string()))?;
        let channel =
            channel_from_chat(&chat).ok_or_else(|| SearchError::ChatNotFound(handle.to_string()))?;
        self.remember(&chat);
        Ok(channel)
    }

    fn history<'a>(
        &'a self,
        channel: &'a Channel,
        limit: Option<usize>,
    ) -> BoxStream<'a, Result<Message>> {
        let Some(packed) = self.packed(channel.id) else {
            let missing = SearchError::ChatNotFound(channel.title.clone());
            return stream::once(async move { Err(missing) }).boxed();
        };

        let mut iter = self.client.iter_messages(packed);
        if let Some(limit) = limit {
            iter = iter.limit(limit);
        }

        stream::try_unfold(iter, move |mut iter| async move {
            match iter.next().await {
                Ok(Some(msg)) => Ok(Some((project(&msg, channel), iter))),
                Ok(None) => Ok(None),
                Err(e) => Err(source_error(e)),
            }
        })
        .boxed()
    }

    async fn reauthenticate(&self) -> Result<()> {
        self.ensure_authorized().await
    }
}

fn channel_from_chat(chat: &Chat) -> Option<Channel> {
    let kind = match chat {
        Chat::User(_) => return None, // Skip direct user conversations
        Chat::Group(group) if group.is_megagroup() => ChatKind::Supergroup,
        Chat::Group(_) => ChatKind::BasicGroup,
        Chat::Channel(channel) if channel.raw.broadcast => ChatKind::Broadcast,
        Chat::Channel(_) => ChatKind::Supergroup,
    };
    Some(Channel {
        id: chat.id(),
        title: chat.name().to_string(),
        username: chat.username().map(str::to_string),
        kind,
    })
}

fn project(msg: &grammers_client::types::Message, channel: &Channel) -> Message {
    let document = match msg.media() {
        Some(Media::Document(doc)) => Some(Document {
            file_name: doc.name().to_string(),
            size: doc.size(),
        }),
        _ => None,
    };
    Message {
        chat_id: channel.id,
        chat_username: channel.username.clone(),
        chat_title: channel.title.clone(),
        chat_kind: channel.kind,
        id: msg.id(),
        text: msg.text().to_string(),
        date: msg.date(),
        sender: msg
            .sender()
            .and_then(|s| s.username().map(str::to_string)),
        document,
    }
}

/// 401 means the session is gone; everything else is worth a retry.
fn source_error(e: InvocationError) -> SearchError {
    match &e {
        InvocationError::Rpc(rpc) if rpc.code == 401 => SearchError::Authentication(e.to_string()),
        _ => SearchError::SourceUnavailable(e.to_string()),
    }
}

async fn login(client: &Client, session_file: &Path) -> Result<()> {
    println!("Telegram login required: please enter your credentials.");
    let phone = prompt("Enter your phone number (international format): ")?;
    let token = client
        .request_login_code(phone.trim())
        .await
        .map_err(|e| SearchError::Authentication(format!("failed to request login code: {}", e)))?;
    let code = prompt("Enter the login code you received: ")?;

    match client.sign_in(&token, code.trim()).await {
        Ok(_) => {}
        Err(SignInError::PasswordRequired(password_token)) => {
            // Two-factor authentication is enabled
            let hint = password_token.hint().unwrap_or("none").to_string();
            let password = prompt(&format!("Enter your password (hint: {}): ", hint))?;
            client
                .check_password(password_token, password.trim())
                .await
                .map_err(|e| SearchError::Authentication(format!("2FA failed: {}", e)))?;
        }
        Err(e) => return Err(SearchError::Authentication(format!("sign in failed: {}", e))),
    }
    println!("Logged in to Telegram successfully.");

    if let Err(e) = client.session().save_to_file(session_file) {
        warn!("Failed to save session file: {}. You will need to log in again next time.", e);
    }
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    let read = || -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", message)?;
        stdout.flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line)
    };
    read().map_err(|e| SearchError::Authentication(format!("cannot read from terminal: {}", e)))
}
