//! Outbound bot interfaces consumed by the dispatch core.

use async_trait::async_trait;

use crate::core::error::DeliveryError;

/// Handle for a delivered poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReceipt {
    pub poll_id: String,
    pub message_id: i32,
}

/// Broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastContent {
    Text(String),
    /// A photo already uploaded to Telegram, resent by file id
    Photo { file_id: String, caption: Option<String> },
}

#[async_trait]
pub trait QuizMessenger: Send + Sync {
    /// Sends a quiz-mode poll with one correct option.
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
        correct_option: u8,
        anonymous: bool,
    ) -> Result<PollReceipt, DeliveryError>;

    /// Plain informational message (limit reached, catalog restarting).
    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;

    async fn send_broadcast(&self, chat_id: i64, content: &BroadcastContent) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait MembershipChecker: Send + Sync {
    /// Whether the bot is still present in the chat. Transient failures are
    /// returned as errors so callers do not deactivate chats on a network blip.
    async fn is_bot_member(&self, chat_id: i64) -> Result<bool, DeliveryError>;
}
