//! teloxide implementations of the outbound quiz interfaces.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, InputPollOption, PollType};

use quizcore::quiz::messenger::{BroadcastContent, MembershipChecker, PollReceipt, QuizMessenger};
use quizcore::DeliveryError;

/// Sends quizzes, notices and broadcasts through the Bot API.
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    /// The bot's own user id, needed for membership checks
    me: UserId,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, me: UserId) -> Self {
        Self { bot, me }
    }
}

#[async_trait]
impl QuizMessenger for TelegramMessenger {
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        options: &[String],
        correct_option: u8,
        anonymous: bool,
    ) -> Result<PollReceipt, DeliveryError> {
        let options = options.iter().map(|option| InputPollOption::new(option.clone()));

        let message = self
            .bot
            .send_poll(ChatId(chat_id), question, options)
            .type_(PollType::Quiz)
            .correct_option_id(correct_option)
            .is_anonymous(anonymous)
            .await?;

        let poll = message
            .poll()
            .ok_or_else(|| DeliveryError::permanent("sendPoll returned a message without a poll"))?;

        Ok(PollReceipt {
            poll_id: poll.id.to_string(),
            message_id: message.id.0,
        })
    }

    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_broadcast(&self, chat_id: i64, content: &BroadcastContent) -> Result<(), DeliveryError> {
        match content {
            BroadcastContent::Text(text) => {
                self.bot.send_message(ChatId(chat_id), text).await?;
            }
            BroadcastContent::Photo { file_id, caption } => {
                let request = self
                    .bot
                    .send_photo(ChatId(chat_id), InputFile::file_id(FileId(file_id.clone())));
                match caption {
                    Some(caption) => request.caption(caption).await?,
                    None => request.await?,
                };
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipChecker for TelegramMessenger {
    async fn is_bot_member(&self, chat_id: i64) -> Result<bool, DeliveryError> {
        // A private chat exists for as long as the user has not blocked us,
        // which surfaces as a send failure instead
        if chat_id > 0 {
            return Ok(true);
        }

        match self.bot.get_chat_member(ChatId(chat_id), self.me).await {
            Ok(member) => Ok(member.is_present()),
            Err(e) => match DeliveryError::from(e) {
                // "chat not found" and "bot was kicked" both mean we are gone
                DeliveryError::Permanent { reason } => {
                    log::info!("Membership check for chat {} failed permanently: {}", chat_id, reason);
                    Ok(false)
                }
                transient => Err(transient),
            },
        }
    }
}
