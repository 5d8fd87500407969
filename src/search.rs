//! The search pipeline: pick chats, walk their history, match, stream hits.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future;
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;

use crate::ai::ClassificationOracle;
use crate::config::AiConfig;
use crate::error::{Result, SearchError};
use crate::link::DeepLink;
use crate::matcher::{MagazineMatcher, Matcher, NewspaperPattern};
use crate::source::{BoundCheck, Channel, HistoryBounds, Message, MessageSource, SAMPLE_SIZE};

/// Messages scanned per chat in magazine mode unless overridden.
pub const DEFAULT_MAGAZINE_LIMIT: usize = 500;
const LABEL_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    /// A specific day's edition, matched by a fixed pattern.
    Newspaper { date: NaiveDate },
    /// Anything relevant to free-text keywords, with AI help.
    Magazine { keywords: String },
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Newspaper { date } => {
                write!(f, "newspaper edition of {}", date.format("%d-%m-%Y"))
            }
            SearchMode::Magazine { keywords } => write!(f, "magazines about \"{}\"", keywords),
        }
    }
}

/// Which chats to search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    /// Broadcast channels the account follows, filtered by mode.
    Subscribed,
    /// One chat by `@username`, username or numeric id.
    Chat(String),
}

/// Everything that defines one search. Not changed once the search starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub mode: SearchMode,
    pub scope: ChatScope,
    pub bounds: HistoryBounds,
}

impl SearchQuery {
    /// Newspaper search limited to messages posted on `date`.
    pub fn newspaper(date: NaiveDate) -> Self {
        Self {
            mode: SearchMode::Newspaper { date },
            scope: ChatScope::Subscribed,
            bounds: HistoryBounds::day(date),
        }
    }

    pub fn magazine(keywords: impl Into<String>) -> Self {
        Self {
            mode: SearchMode::Magazine {
                keywords: keywords.into(),
            },
            scope: ChatScope::Subscribed,
            bounds: HistoryBounds {
                limit: Some(DEFAULT_MAGAZINE_LIMIT),
                ..Default::default()
            },
        }
    }

    pub fn in_chat(mut self, chat: impl Into<String>) -> Self {
        self.scope = ChatScope::Chat(chat.into());
        self
    }

    pub fn with_bounds(mut self, bounds: HistoryBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.bounds.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let SearchMode::Magazine { keywords } = &self.mode {
            if keywords.trim().is_empty() {
                return Err(SearchError::InvalidQuery(
                    "keywords are required for magazine search".to_string(),
                ));
            }
        }
        if self.bounds.limit == Some(0) {
            return Err(SearchError::InvalidQuery(
                "message limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A message judged relevant, ready to show.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub message: Message,
    pub label: String,
    pub link: DeepLink,
}

impl MatchResult {
    pub fn new(message: Message) -> Self {
        let label = label_for(&message);
        let link = DeepLink::for_message(&message);
        Self {
            message,
            label,
            link,
        }
    }

    /// Text the copy action puts next to the link.
    pub fn reference(&self) -> String {
        format!("{} msg_id: {}", self.message.chat_title, self.message.id)
    }
}

fn label_for(message: &Message) -> String {
    match &message.document {
        Some(doc) if !doc.file_name.is_empty() => format!(
            "{} | {} | {:.2} MB",
            doc.file_name,
            message.chat_title,
            doc.size_mb()
        ),
        _ => {
            let first_line = message.text.lines().next().unwrap_or("").trim();
            let mut short: String = first_line.chars().take(LABEL_WIDTH).collect();
            if first_line.chars().count() > LABEL_WIDTH {
                short.push('…');
            }
            format!("{} | {}", short, message.chat_title)
        }
    }
}

/// Progress of a running search, delivered in order.
#[derive(Debug)]
pub enum SearchEvent {
    Started { mode: SearchMode },
    Scanning { channel: String, index: usize, total: usize },
    Match(MatchResult),
    Completed(SearchSummary),
    Aborted(SearchError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    pub channels: usize,
    pub scanned: usize,
    pub matches: usize,
}

/// Build the matcher for a query.
pub fn build_matcher(
    query: &SearchQuery,
    oracle: Arc<dyn ClassificationOracle>,
    ai: &AiConfig,
) -> Result<Matcher> {
    query.validate()?;
    match &query.mode {
        SearchMode::Newspaper { date } => NewspaperPattern::for_date(*date)
            .map(Matcher::Newspaper)
            .map_err(|e| SearchError::InvalidQuery(e.to_string())),
        SearchMode::Magazine { keywords } => {
            MagazineMatcher::new(keywords, oracle, ai.timeout, ai.failure_policy)
                .map(Matcher::Magazine)
                .map_err(|e| SearchError::InvalidQuery(e.to_string()))
        }
    }
}

/// Run one search to completion, sending `Started`, `Scanning` and `Match` events.
///
/// Matches go out in source order. Oracle calls overlap up to `concurrency`
/// per chat. Source errors end the search; classification errors never do.
pub async fn run_search<S>(
    source: &S,
    matcher: &Matcher,
    query: &SearchQuery,
    concurrency: usize,
    events: &UnboundedSender<SearchEvent>,
) -> Result<SearchSummary>
where
    S: MessageSource + ?Sized,
{
    query.validate()?;
    let _ = events.send(SearchEvent::Started {
        mode: query.mode.clone(),
    });
    info!("Searching for {}", query.mode);

    let channels = select_channels(source, query).await?;
    let total = channels.len();
    let concurrency = if matcher.is_remote() {
        concurrency.max(1)
    } else {
        1
    };
    let dedupe = matches!(query.mode, SearchMode::Magazine { .. });
    let bounds = &query.bounds;

    let mut summary = SearchSummary {
        channels: total,
        ..Default::default()
    };
    let mut seen: HashSet<(String, i64)> = HashSet::new();

    for (index, channel) in channels.iter().enumerate() {
        info!("[{}/{}] Scanning channel: {}", index + 1, total, channel.title);
        let _ = events.send(SearchEvent::Scanning {
            channel: channel.title.clone(),
            index,
            total,
        });

        let mut scanned = 0;
        {
            let hits = source
                .history(channel, bounds.limit)
                .try_take_while(|m| future::ready(Ok(bounds.check(m) != BoundCheck::Exhausted)))
                .try_filter(|m| {
                    let keep = bounds.check(m) == BoundCheck::Include
                        && (!dedupe || first_sighting(&mut seen, m));
                    future::ready(keep)
                })
                .inspect_ok(|_| scanned += 1)
                .map_ok(move |m| async move {
                    let hit = matcher.matches(&m).await;
                    Ok::<_, SearchError>((m, hit))
                })
                .try_buffered(concurrency);
            futures::pin_mut!(hits);

            while let Some((message, hit)) = hits.try_next().await? {
                if !hit {
                    continue;
                }
                let result = MatchResult::new(message);
                info!(
                    "[MATCH] {} | msg_id: {} | Link: {}",
                    result.label, result.message.id, result.link
                );
                summary.matches += 1;
                let _ = events.send(SearchEvent::Match(result));
            }
        }
        summary.scanned += scanned;
    }

    info!(
        "Search finished: {} match(es) in {} message(s) across {} channel(s)",
        summary.matches, summary.scanned, summary.channels
    );
    Ok(summary)
}

/// Records a document the first time it is seen. Text-only messages always pass.
fn first_sighting(seen: &mut HashSet<(String, i64)>, message: &Message) -> bool {
    match &message.document {
        Some(doc) => seen.insert((doc.file_name.to_lowercase(), doc.size)),
        None => true,
    }
}

async fn select_channels<S>(source: &S, query: &SearchQuery) -> Result<Vec<Channel>>
where
    S: MessageSource + ?Sized,
{
    if let ChatScope::Chat(handle) = &query.scope {
        return Ok(vec![source.resolve(handle).await?]);
    }

    let mut selected = Vec::new();
    for channel in source.channels().await? {
        if !channel.is_broadcast() {
            continue;
        }
        let keep = match query.mode {
            SearchMode::Newspaper { .. } => channel.looks_like_newspaper_channel(),
            SearchMode::Magazine { .. } => !is_junk_channel(source, &channel).await?,
        };
        if keep {
            selected.push(channel);
        } else {
            debug!("Skipping channel: {}", channel.title);
        }
    }
    Ok(selected)
}

/// A channel is junk when its newest messages distribute executables.
async fn is_junk_channel<S>(source: &S, channel: &Channel) -> Result<bool>
where
    S: MessageSource + ?Sized,
{
    let mut sample = source.history(channel, Some(SAMPLE_SIZE));
    while let Some(message) = sample.try_next().await? {
        if message.document.as_ref().is_some_and(|d| d.is_executable()) {
            info!("Skipping junk channel: {}", channel.title);
            return Ok(true);
        }
    }
    Ok(false)
}
