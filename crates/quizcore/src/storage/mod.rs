//! Persistence seams for chat state, daily counts, polls, served chats and scores.
//!
//! Every store is synchronous: SQLite calls are short and the in-memory
//! store never blocks. Callers hold no async locks across them.

pub mod db;
pub mod memory;
pub mod migrations;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::config;
use crate::core::error::AppResult;

pub use db::{create_pool, get_connection, DbConnection, DbPool, SqliteStore};
pub use memory::MemoryStore;

/// Per-chat quiz state. One record per chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    pub active: bool,
    pub paused: bool,
    /// Seconds between scheduled quizzes, at least `MIN_INTERVAL_SECS`
    pub interval_seconds: u64,
    pub category: String,
    pub used_question_ids: HashSet<String>,
}

impl ChatState {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            active: false,
            paused: false,
            interval_seconds: config::schedule::DEFAULT_INTERVAL_SECS,
            category: category.into(),
            used_question_ids: HashSet::new(),
        }
    }

    /// Whether scheduled ticks should produce tasks for this chat.
    pub fn is_running(&self) -> bool {
        self.active && !self.paused
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(config::DEFAULT_CATEGORY.as_str())
    }
}

/// Conversation kind, used to pick the daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

impl ChatKind {
    /// Telegram gives groups and channels negative ids.
    pub fn from_chat_id(chat_id: i64) -> Self {
        if chat_id < 0 {
            ChatKind::Group
        } else {
            ChatKind::Private
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
        }
    }
}

/// A delivered poll, kept so answers can be scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRecord {
    pub poll_id: String,
    pub chat_id: i64,
    pub message_id: i32,
    pub question_id: String,
    pub correct_option: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    pub user_id: i64,
    pub display_name: String,
    pub score: i64,
}

/// One answered poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizAttempt {
    pub user_id: i64,
    pub poll_id: String,
    pub correct: bool,
    pub points: i64,
    pub answered_at: DateTime<Utc>,
}

pub trait ChatStateStore: Send + Sync {
    fn get_chat_state(&self, chat_id: i64) -> AppResult<Option<ChatState>>;
    fn put_chat_state(&self, chat_id: i64, state: &ChatState) -> AppResult<()>;
    /// Chats whose state is active, used to re-seed schedules at startup.
    fn list_active(&self) -> AppResult<Vec<i64>>;

    /// Flips the active flag, creating a default record when none exists.
    fn set_active(&self, chat_id: i64, active: bool) -> AppResult<ChatState> {
        let mut state = self.get_chat_state(chat_id)?.unwrap_or_default();
        state.active = active;
        self.put_chat_state(chat_id, &state)?;
        Ok(state)
    }
}

pub trait DailyCountStore: Send + Sync {
    fn daily_count(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32>;
    fn increment_and_get(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32>;
    /// Records that the limit notice went out. Returns true only the first
    /// time for a given chat and date.
    fn mark_limit_notified(&self, chat_id: i64, date: NaiveDate) -> AppResult<bool>;
}

pub trait PollLedger: Send + Sync {
    fn record_poll(&self, record: &PollRecord) -> AppResult<()>;
    fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollRecord>>;
}

pub trait ServedStore: Send + Sync {
    fn add_served_chat(&self, chat_id: i64) -> AppResult<()>;
    fn add_served_user(&self, user_id: i64) -> AppResult<()>;
    fn served_chats(&self) -> AppResult<Vec<i64>>;
    fn served_users(&self) -> AppResult<Vec<i64>>;
}

pub trait LeaderboardStore: Send + Sync {
    /// Adds `points` to the user's total, creating the entry if needed.
    fn add_score(&self, user_id: i64, display_name: &str, points: i64) -> AppResult<()>;
    /// All scores, highest first. Ties keep insertion order.
    fn all_scores(&self) -> AppResult<Vec<ScoreEntry>>;
    fn record_attempt(&self, attempt: &QuizAttempt) -> AppResult<()>;
    /// The user's attempts, newest first.
    fn attempts_for(&self, user_id: i64) -> AppResult<Vec<QuizAttempt>>;
    /// Whether the user already answered this poll.
    fn has_answered(&self, user_id: i64, poll_id: &str) -> AppResult<bool>;

    fn top_scores(&self, limit: usize) -> AppResult<Vec<ScoreEntry>> {
        let mut scores = self.all_scores()?;
        scores.truncate(limit);
        Ok(scores)
    }
}

/// Everything the bot persists, behind one object.
pub trait QuizStore: ChatStateStore + DailyCountStore + PollLedger + ServedStore + LeaderboardStore {}

impl<T> QuizStore for T where T: ChatStateStore + DailyCountStore + PollLedger + ServedStore + LeaderboardStore {}
