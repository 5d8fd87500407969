use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::source::{ChatKind, Message};

/// A link that opens one specific message in a Telegram client.
///
/// Public chats (with username): `https://t.me/{username}/{message_id}`
/// Private chats (no username):  `https://t.me/c/{chat_id}/{message_id}`
/// Basic groups:                  `tg://openmessage?chat_id=-{chat_id}&message_id={message_id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeepLink {
    Public { username: String, message_id: i32 },
    Private { chat_id: i64, message_id: i32 },
    Group { chat_id: i64, message_id: i32 },
}

impl DeepLink {
    pub fn for_message(message: &Message) -> Self {
        if message.chat_kind == ChatKind::BasicGroup {
            return DeepLink::Group {
                chat_id: message.chat_id,
                message_id: message.id,
            };
        }
        match message.chat_username.as_deref() {
            Some(username) if !username.is_empty() => DeepLink::Public {
                username: username.to_string(),
                message_id: message.id,
            },
            _ => DeepLink::Private {
                chat_id: message.chat_id,
                message_id: message.id,
            },
        }
    }

    pub fn message_id(&self) -> i32 {
        match self {
            DeepLink::Public { message_id, .. }
            | DeepLink::Private { message_id, .. }
            | DeepLink::Group { message_id, .. } => *message_id,
        }
    }

    /// True when this link resolves to exactly `message`.
    pub fn points_to(&self, message: &Message) -> bool {
        match self {
            DeepLink::Public {
                username,
                message_id,
            } => {
                *message_id == message.id
                    && message
                        .chat_username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(username))
            }
            DeepLink::Private {
                chat_id,
                message_id,
            } => {
                *message_id == message.id
                    && *chat_id == message.chat_id
                    && message.chat_kind != ChatKind::BasicGroup
            }
            DeepLink::Group {
                chat_id,
                message_id,
            } => {
                *message_id == message.id
                    && *chat_id == message.chat_id
                    && message.chat_kind == ChatKind::BasicGroup
            }
        }
    }
}

impl fmt::Display for DeepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeepLink::Public {
                username,
                message_id,
            } => write!(f, "https://t.me/{}/{}", username, message_id),
            DeepLink::Private {
                chat_id,
                message_id,
            } => write!(f, "https://t.me/c/{}/{}", chat_id, message_id),
            DeepLink::Group {
                chat_id,
                message_id,
            } => write!(
                f,
                "tg://openmessage?chat_id=-{}&message_id={}",
                chat_id, message_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a Telegram message link: {0}")]
pub struct InvalidLink(String);

impl FromStr for DeepLink {
    type Err = InvalidLink;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidLink(s.to_string());
        let url = Url::parse(s.trim()).map_err(|_| invalid())?;

        match url.scheme() {
            "https" | "http" => {
                if !matches!(url.host_str(), Some("t.me") | Some("telegram.me")) {
                    return Err(invalid());
                }
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                    .unwrap_or_default();
                match segments.as_slice() {
                    ["c", chat_id, message_id] => Ok(DeepLink::Private {
                        chat_id: chat_id.parse().map_err(|_| invalid())?,
                        message_id: message_id.parse().map_err(|_| invalid())?,
                    }),
                    [username, message_id] => Ok(DeepLink::Public {
                        username: username.to_string(),
                        message_id: message_id.parse().map_err(|_| invalid())?,
                    }),
                    _ => Err(invalid()),
                }
            }
            // tg://openmessage?chat_id=..&message_id=..
            "tg" if url.host_str() == Some("openmessage") => {
                let mut chat_id = None;
                let mut message_id = None;
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "chat_id" => chat_id = value.parse::<i64>().ok(),
                        "message_id" => message_id = value.parse::<i32>().ok(),
                        _ => {}
                    }
                }
                match (chat_id, message_id) {
                    (Some(chat_id), Some(message_id)) => {
                        link_for_dialog(chat_id, message_id).ok_or_else(invalid)
                    }
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        }
    }
}

const CHANNEL_PREFIX: u64 = 1_000_000_000_000;

/// Decode a Bot API style dialog id: `-100{id}` for channels, `-{id}` for basic groups.
fn link_for_dialog(dialog_id: i64, message_id: i32) -> Option<DeepLink> {
    let magnitude = dialog_id.unsigned_abs();
    if dialog_id < 0 && magnitude >= CHANNEL_PREFIX {
        let bare = magnitude.checked_sub(CHANNEL_PREFIX)?;
        if bare == 0 || bare >= CHANNEL_PREFIX {
            return None;
        }
        let chat_id = i64::try_from(bare).ok()?;
        Some(DeepLink::Private {
            chat_id,
            message_id,
        })
    } else if dialog_id < 0 {
        Some(DeepLink::Group {
            chat_id: i64::try_from(magnitude).ok()?,
            message_id,
        })
    } else {
        (dialog_id > 0).then_some(DeepLink::Private {
            chat_id: dialog_id,
            message_id,
        })
    }
}
