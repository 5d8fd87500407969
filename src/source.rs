//! Message source contract and the read-only message projection it yields.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::stream::BoxStream;

use crate::error::Result;

/// Number of newest messages inspected when deciding whether a channel is junk.
pub const SAMPLE_SIZE: usize = 20;

const NEWSPAPER_CHANNEL_HINTS: &[&str] = &["newspaper", "epaper", "paper"];
const EXECUTABLE_EXTENSIONS: &[&str] = &[".apk", ".exe", ".dmg", ".ipa"];
const READING_EXTENSIONS: &[&str] = &[".pdf", ".epub", ".mobi", ".zip", ".rar"];

/// How Telegram models a chat. Decides which link form opens its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatKind {
    #[default]
    Broadcast,
    /// Channel-backed group.
    Supergroup,
    /// Legacy small group; `t.me/c` links do not resolve for these.
    BasicGroup,
}

/// A chat whose history can be searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Bare Telegram id of the chat.
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub kind: ChatKind,
}

impl Channel {
    pub fn is_broadcast(&self) -> bool {
        self.kind == ChatKind::Broadcast
    }

    /// Title looks like a newspaper / e-paper distribution channel.
    pub fn looks_like_newspaper_channel(&self) -> bool {
        let title = self.title.to_lowercase();
        NEWSPAPER_CHANNEL_HINTS.iter().any(|hint| title.contains(hint))
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub size: i64,
}

impl Document {
    pub fn is_executable(&self) -> bool {
        let name = self.file_name.to_lowercase();
        EXECUTABLE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }

    /// E-book, PDF or an archive that usually wraps one.
    pub fn is_reading_format(&self) -> bool {
        let name = self.file_name.to_lowercase();
        READING_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// One message as seen by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub chat_id: i64,
    pub chat_username: Option<String>,
    pub chat_title: String,
    pub chat_kind: ChatKind,
    pub id: i32,
    /// Message text, or the caption for media messages.
    pub text: String,
    pub date: DateTime<Utc>,
    pub sender: Option<String>,
    pub document: Option<Document>,
}

impl Message {
    /// Text the matchers look at: attached file name followed by the caption.
    pub fn searchable_text(&self) -> String {
        match &self.document {
            Some(doc) if !doc.file_name.is_empty() => {
                if self.text.is_empty() {
                    doc.file_name.clone()
                } else {
                    format!("{} {}", doc.file_name, self.text)
                }
            }
            _ => self.text.clone(),
        }
    }
}

/// Optional filters applied while walking a chat's history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryBounds {
    /// Oldest instant to include.
    pub since: Option<DateTime<Utc>>,
    /// Newest instant to include (exclusive).
    pub until: Option<DateTime<Utc>>,
    /// Only messages sent by this username.
    pub sender: Option<String>,
    /// Stop after this many messages per chat.
    pub limit: Option<usize>,
}

/// Where a message falls relative to the bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundCheck {
    Include,
    Skip,
    /// Older than `since`. Sources yield newest first, so nothing after this can match.
    Exhausted,
}

impl HistoryBounds {
    /// Bounds covering one calendar day in local time.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_hms_opt(0, 0, 0).and_then(local_to_utc);
        let end = date
            .succ_opt()
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .and_then(local_to_utc);
        HistoryBounds {
            since: start,
            until: end,
            ..Default::default()
        }
    }

    pub fn check(&self, message: &Message) -> BoundCheck {
        if let Some(since) = self.since {
            if message.date < since {
                return BoundCheck::Exhausted;
            }
        }
        if let Some(until) = self.until {
            if message.date >= until {
                return BoundCheck::Skip;
            }
        }
        if let Some(sender) = &self.sender {
            let wanted = sender.trim_start_matches('@');
            match &message.sender {
                Some(actual) if actual.eq_ignore_ascii_case(wanted) => {}
                _ => return BoundCheck::Skip,
            }
        }
        BoundCheck::Include
    }
}

fn local_to_utc(naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    chrono::Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Read access to a messaging account.
///
/// Implementations must yield history newest first. They are not expected to be
/// safe for two concurrent searches; `SearchController` guarantees there is only one.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Chats the account can search when no specific chat is requested.
    async fn channels(&self) -> Result<Vec<Channel>>;

    /// Find a chat by `@username`, username or numeric id.
    async fn resolve(&self, handle: &str) -> Result<Channel>;

    /// Lazily walk a chat's history, newest first, yielding at most `limit` messages.
    fn history<'a>(
        &'a self,
        channel: &'a Channel,
        limit: Option<usize>,
    ) -> BoxStream<'a, Result<Message>>;

    /// Re-establish an expired login. Sources without sessions have nothing to do.
    async fn reauthenticate(&self) -> Result<()> {
        Ok(())
    }
}
