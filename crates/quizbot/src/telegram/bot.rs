//! Bot initialization and command definitions
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - Argument parsing for commands that take one

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, Chat};
use teloxide::utils::command::BotCommands;

use quizcore::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "welcome message")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "start scheduled quizzes in this group")]
    Sendgroup,
    #[command(description = "start scheduled quizzes in a private chat")]
    Prequiz,
    #[command(description = "stop quizzes in this chat")]
    Stopquiz,
    #[command(description = "pause quizzes without losing progress")]
    Pausequiz,
    #[command(description = "resume paused quizzes")]
    Resumequiz,
    #[command(description = "set seconds between quizzes")]
    Setinterval(String),
    #[command(description = "switch quiz category")]
    Category(String),
    #[command(description = "send a quiz right now")]
    Sendnow,
    #[command(description = "top 20 players")]
    Leaderboard,
    #[command(description = "your score and accuracy")]
    Mystats,
    #[command(description = "delivery statistics (admins only)")]
    Quizstats,
    #[command(description = "resource usage (admins only)")]
    Performance,
    #[command(description = "message every chat and user (admins only)")]
    Broadcast(String),
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Missing token, invalid URL or HTTP client failure
pub fn create_bot() -> anyhow::Result<Bot> {
    if config::BOT_TOKEN.is_empty() {
        return Err(anyhow::anyhow!("BOT_TOKEN environment variable not set"));
    }

    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(config::BOT_TOKEN.as_str(), client);

    let bot = match std::env::var("BOT_API_URL") {
        Ok(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = reqwest::Url::parse(&bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            bot.set_api_url(url)
        }
        Err(_) => bot,
    };

    Ok(bot)
}

/// Publishes the user-facing commands in the Telegram UI. Admin commands
/// stay unlisted.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(vec![
        BotCommand::new("start", "welcome message"),
        BotCommand::new("help", "show available commands"),
        BotCommand::new("sendgroup", "start quizzes in this group"),
        BotCommand::new("prequiz", "start quizzes in a private chat"),
        BotCommand::new("stopquiz", "stop quizzes"),
        BotCommand::new("pausequiz", "pause quizzes"),
        BotCommand::new("resumequiz", "resume quizzes"),
        BotCommand::new("setinterval", "seconds between quizzes"),
        BotCommand::new("category", "switch quiz category"),
        BotCommand::new("sendnow", "send a quiz right now"),
        BotCommand::new("leaderboard", "top 20 players"),
        BotCommand::new("mystats", "your statistics"),
    ])
    .await?;

    Ok(())
}

/// Why a `/setinterval` argument was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalError {
    NotANumber,
    TooShort,
}

impl IntervalError {
    pub fn reply(&self) -> String {
        match self {
            IntervalError::NotANumber => "Usage: /setinterval <seconds>".to_string(),
            IntervalError::TooShort => format!(
                "Interval must be at least {} seconds.",
                config::schedule::MIN_INTERVAL_SECS
            ),
        }
    }
}

/// Parses the `/setinterval` argument in whole seconds.
pub fn parse_interval(arg: &str) -> Result<u64, IntervalError> {
    let seconds: u64 = arg
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or(IntervalError::NotANumber)?;

    if seconds < config::schedule::MIN_INTERVAL_SECS {
        return Err(IntervalError::TooShort);
    }
    Ok(seconds)
}

pub fn is_group_chat(chat: &Chat) -> bool {
    chat.is_group() || chat.is_supergroup()
}
