//! Structural pattern for one day's edition of a newspaper.

use chrono::{Datelike, NaiveDate};
use regex::Regex;

const PUBLICATION_ALIASES: &[&str] = &["TOI", "TOIH", "Times of India"];
const EDITION_ALIASES: &[&str] = &["Hyd", "Hyderabad"];

const MONTH_NAMES: [&[&str]; 12] = [
    &["january", "jan"],
    &["february", "feb"],
    &["march", "mar"],
    &["april", "apr"],
    &["may"],
    &["june", "jun"],
    &["july", "jul"],
    &["august", "aug"],
    &["september", "sept", "sep"],
    &["october", "oct"],
    &["november", "nov"],
    &["december", "dec"],
];

const SEP: &str = r"[-./_\s]";
/// Separators allowed between a date and a trailing year.
const TAIL_SEP: &str = r"[-./_,\s]";

/// Matches text that names the publication, the edition and the date, in any order.
#[derive(Debug, Clone)]
pub struct NewspaperPattern {
    date: NaiveDate,
    publication: Regex,
    edition: Regex,
    date_token: Regex,
}

impl NewspaperPattern {
    /// Pattern for the Hyderabad edition of the Times of India on `date`.
    pub fn for_date(date: NaiveDate) -> Result<Self, regex::Error> {
        Self::with_aliases(date, PUBLICATION_ALIASES, EDITION_ALIASES)
    }

    pub fn with_aliases(
        date: NaiveDate,
        publication: &[&str],
        edition: &[&str],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            date,
            publication: alias_regex(publication)?,
            edition: alias_regex(edition)?,
            date_token: date_regex(date)?,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.publication.is_match(text)
            && self.edition.is_match(text)
            && self.date_token.is_match(text)
    }
}

/// Any alias, delimited by non-alphanumerics or the ends of the text.
/// Words inside an alias may be separated by any run of punctuation or spaces.
fn alias_regex(aliases: &[&str]) -> Result<Regex, regex::Error> {
    let alternatives: Vec<String> = aliases
        .iter()
        .map(|alias| {
            alias
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\W_]*")
        })
        .collect();
    let pattern = format!(
        r"(?i)(?:^|[^a-z0-9])(?:{})(?:[^a-z0-9]|$)",
        alternatives.join("|")
    );
    Regex::new(&pattern)
}

fn number(n: u32) -> String {
    if n < 10 {
        format!("0?{}", n)
    } else {
        n.to_string()
    }
}

fn date_regex(date: NaiveDate) -> Result<Regex, regex::Error> {
    let day = number(date.day());
    let month = number(date.month());
    let year = format!("(?:{}|{:02})", date.year(), date.year() % 100);
    let names = MONTH_NAMES[date.month0() as usize].join("|");

    // After day and month: D's year, or nothing that could be another year.
    let tail = format!(
        r"(?:{TAIL_SEP}+{year}(?:\D|$)|{TAIL_SEP}*$|{TAIL_SEP}*[^\da-z\-./_,\s]|{TAIL_SEP}+[a-z])"
    );

    let numeric = format!(r"(?:^|\D){day}{SEP}{month}{tail}");
    let day_first = format!(r"(?:^|\D){day}(?:st|nd|rd|th)?{SEP}*(?:{names})\b{tail}");
    let month_first = format!(r"\b(?:{names})\.?{SEP}*{day}(?:st|nd|rd|th)?{tail}");

    let pattern = format!("(?i){}|{}|{}", numeric, day_first, month_first);
    Regex::new(&pattern)
}
