//! Finds newspaper and magazine uploads across a Telegram account's channels.

pub mod ai;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod link;
pub mod matcher;
pub mod presenter;
pub mod search;
pub mod source;
pub mod telegram;

pub use error::{ConfigError, Result, SearchError};
