use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};

use crate::search::SearchQuery;

/// Find newspaper and magazine uploads in your Telegram channels.
#[derive(Debug, Parser)]
#[command(name = "paper-finder", version, about)]
pub struct Cli {
    /// Exit once the first search finishes instead of waiting for more commands
    #[arg(long, global = true)]
    pub once: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find a day's Times of India Hyderabad edition
    Newspaper {
        /// Edition date as DD-MM-YYYY (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Search only this chat (@username or numeric id)
        #[arg(short, long)]
        chat: Option<String>,
    },
    /// Find magazines relevant to free-text keywords
    Magazine {
        /// What the magazine should be about
        #[arg(short, long)]
        keywords: String,

        /// Search only this chat (@username or numeric id)
        #[arg(short, long)]
        chat: Option<String>,

        /// Messages to scan per chat
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Prompt for commands (default)
    Interactive,
}

impl Cli {
    /// Search to run before handing over to the prompt, if any.
    pub fn initial_query(&self) -> Option<SearchQuery> {
        match self.command.as_ref()? {
            Commands::Newspaper { date, chat } => {
                let date = date.unwrap_or_else(|| Local::now().date_naive());
                let query = SearchQuery::newspaper(date);
                Some(match chat {
                    Some(chat) => query.in_chat(chat.clone()),
                    None => query,
                })
            }
            Commands::Magazine {
                keywords,
                chat,
                limit,
            } => {
                let mut query = SearchQuery::magazine(keywords.clone());
                if let Some(chat) = chat {
                    query = query.in_chat(chat.clone());
                }
                if let Some(limit) = limit {
                    query = query.with_limit(*limit);
                }
                Some(query)
            }
            Commands::Interactive => None,
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%d-%m-%Y")
        .map_err(|_| format!("'{}' is not a DD-MM-YYYY date", value))
}
