use chrono::{DateTime, Utc};

use crate::core::error::{AppError, AppResult};

/// Priority levels. Lower is more urgent.
pub mod priority {
    /// Manual "send now" requests
    pub const MANUAL: u8 = 0;
    /// Routine interval ticks
    pub const SCHEDULED: u8 = 1;
}

/// Request to deliver one quiz question to one chat.
///
/// Lives only in the in-memory queue. The chat's persisted state is the
/// source of truth, so tasks lost on restart are re-derived by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizTask {
    /// Unique task identifier (UUID)
    pub id: String,
    /// Target Telegram chat
    pub chat_id: i64,
    /// Category requested when the task was built; the chat's stored
    /// category wins at execution time
    pub category: String,
    /// Lower value runs first
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    /// Retries spent on the last execution
    pub retry_count: u32,
    /// Arrival order, assigned by the queue on first enqueue
    pub(crate) sequence: Option<u64>,
}

impl QuizTask {
    /// Builds a validated task.
    pub fn new(chat_id: i64, category: impl Into<String>, priority: u8) -> AppResult<Self> {
        let category = category.into();
        let category = category.trim();
        if category.is_empty() {
            return Err(AppError::Validation(format!("empty quiz category for chat {}", chat_id)));
        }
        if chat_id == 0 {
            return Err(AppError::Validation("chat id 0 is not a Telegram chat".to_string()));
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id,
            category: category.to_string(),
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
            sequence: None,
        })
    }

    pub fn is_manual(&self) -> bool {
        self.priority == priority::MANUAL
    }
}
