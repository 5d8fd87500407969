//! Decides whether a message is a hit for the current search.

pub mod magazine;
pub mod newspaper;

pub use magazine::{LocalVerdict, MagazineMatcher};
pub use newspaper::NewspaperPattern;

use crate::source::Message;

/// The two search modes behind one contract: message in, match or not out.
pub enum Matcher {
    Newspaper(NewspaperPattern),
    Magazine(MagazineMatcher),
}

impl Matcher {
    pub async fn matches(&self, message: &Message) -> bool {
        match self {
            Matcher::Newspaper(pattern) => pattern.is_match(&message.searchable_text()),
            Matcher::Magazine(matcher) => matcher.matches(message).await,
        }
    }

    /// Whether `matches` may call out over the network.
    pub fn is_remote(&self) -> bool {
        matches!(self, Matcher::Magazine(_))
    }
}
