//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::{MaybeAnonymousUser, Message, MessageId, PollAnswer, ReplyParameters};
use teloxide::utils::command::BotCommands;

use quizcore::quiz::messenger::BroadcastContent;
use quizcore::AppResult;

use super::commands::{self, GROUP_ONLY, NOT_AUTHORIZED, PRIVATE_ONLY, WELCOME};
use super::types::{display_name, user_id, HandlerDeps, HandlerError};
use crate::telegram::bot::{is_group_chat, Command};

/// Creates the main dispatcher schema for the Telegram bot.
///
/// Poll answers are scored first. Every message then registers its chat and
/// sender as broadcast targets before command routing.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_answers = deps.clone();
    let deps_served = deps.clone();
    let deps_commands = deps;

    dptree::entry().branch(poll_answer_handler(deps_answers)).branch(
        Update::filter_message()
            .inspect(move |msg: Message| deps_served.register_served(&msg))
            .branch(command_handler(deps_commands)),
    )
}

/// Scores answers to quiz polls sent by the bot and replies under the quiz
fn poll_answer_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_poll_answer().endpoint(move |bot: Bot, answer: PollAnswer| {
        let deps = deps.clone();
        async move {
            // Answers given on behalf of a channel cannot be scored
            let MaybeAnonymousUser::User(user) = &answer.voter else {
                return Ok(());
            };
            let Some(voter_id) = user_id(user) else {
                return Ok(());
            };

            let poll_id = answer.poll_id.to_string();
            let feedback = match commands::answer_poll(
                &deps,
                &poll_id,
                voter_id,
                &display_name(user),
                &answer.option_ids,
            ) {
                Ok(Some(feedback)) => feedback,
                Ok(None) => return Ok(()),
                Err(e) => {
                    log::error!("Failed to record answer from {} on poll {}: {}", voter_id, poll_id, e);
                    return Ok(());
                }
            };

            let reply = ReplyParameters::new(MessageId(feedback.reply_to)).allow_sending_without_reply();
            if let Err(e) = bot
                .send_message(ChatId(feedback.chat_id), feedback.text)
                .reply_parameters(reply)
                .await
            {
                log::warn!("Failed to send answer feedback to chat {}: {}", feedback.chat_id, e);
            }
            Ok(())
        }
    })
}

/// Handler for bot commands (/start, /sendgroup, /leaderboard, etc.)
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .filter_command::<Command>()
        .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                log::info!("Received command: {:?} from chat {}", cmd, msg.chat.id);

                let chat_id = msg.chat.id.0;
                let sender = msg.from.as_ref().and_then(user_id);

                let reply: AppResult<String> = match cmd {
                    Command::Start => Ok(WELCOME.to_string()),
                    Command::Help => Ok(Command::descriptions().to_string()),
                    Command::Sendgroup => {
                        if is_group_chat(&msg.chat) {
                            commands::start_quiz(&deps, chat_id)
                        } else {
                            Ok(GROUP_ONLY.to_string())
                        }
                    }
                    Command::Prequiz => {
                        if msg.chat.is_private() {
                            commands::start_quiz(&deps, chat_id)
                        } else {
                            Ok(PRIVATE_ONLY.to_string())
                        }
                    }
                    Command::Stopquiz => commands::stop_quiz(&deps, chat_id),
                    Command::Pausequiz => commands::pause_quiz(&deps, chat_id),
                    Command::Resumequiz => commands::resume_quiz(&deps, chat_id),
                    Command::Setinterval(arg) => commands::set_interval(&deps, chat_id, &arg),
                    Command::Category(arg) => commands::set_category(&deps, chat_id, &arg),
                    Command::Sendnow => commands::send_now(&deps, chat_id),
                    Command::Leaderboard => commands::leaderboard(&deps),
                    Command::Mystats => match sender {
                        Some(user) => commands::my_stats(&deps, user),
                        None => Ok("Statistics are only available for regular users.".to_string()),
                    },
                    Command::Quizstats | Command::Performance | Command::Broadcast(_)
                        if !sender.is_some_and(|user| deps.is_admin(user)) =>
                    {
                        Ok(NOT_AUTHORIZED.to_string())
                    }
                    Command::Quizstats => Ok(commands::quiz_stats(&deps)),
                    Command::Performance => Ok(commands::performance(&deps)),
                    Command::Broadcast(text) => {
                        start_broadcast(&bot, &msg, &deps, &text).await?;
                        return Ok(());
                    }
                };

                let text = reply.unwrap_or_else(|e| {
                    log::error!("Command failed in chat {}: {}", chat_id, e);
                    "Something went wrong. Please try again later.".to_string()
                });
                bot.send_message(msg.chat.id, text).await?;
                Ok(())
            }
        })
}

/// Picks the broadcast payload: a replied-to photo or text, else the command
/// argument.
pub fn broadcast_content(msg: &Message, arg: &str) -> Option<BroadcastContent> {
    if let Some(reply) = msg.reply_to_message() {
        if let Some(photo) = reply.photo().and_then(|sizes| sizes.last()) {
            return Some(BroadcastContent::Photo {
                file_id: photo.file.id.0.clone(),
                caption: reply.caption().map(str::to_string),
            });
        }
        if let Some(text) = reply.text() {
            return Some(BroadcastContent::Text(text.to_string()));
        }
    }

    let arg = arg.trim();
    if arg.is_empty() {
        None
    } else {
        Some(BroadcastContent::Text(arg.to_string()))
    }
}

/// Runs the broadcast in the background and edits the status message with
/// the final tally.
async fn start_broadcast(bot: &Bot, msg: &Message, deps: &HandlerDeps, arg: &str) -> Result<(), HandlerError> {
    let Some(content) = broadcast_content(msg, arg) else {
        bot.send_message(msg.chat.id, "Usage: /broadcast <message> or reply to a message with /broadcast")
            .await?;
        return Ok(());
    };
    if deps.broadcast.is_running() {
        bot.send_message(msg.chat.id, "A broadcast is already running.").await?;
        return Ok(());
    }

    let status = bot.send_message(msg.chat.id, "Starting broadcast...").await?;
    let bot = bot.clone();
    let manager = deps.broadcast.clone();

    tokio::spawn(async move {
        let text = match manager.broadcast(&content).await {
            Ok(report) => commands::format_broadcast_report(&report),
            Err(e) => {
                log::error!("Broadcast error: {}", e);
                format!("Broadcast failed: {}", e)
            }
        };
        if let Err(e) = bot.edit_message_text(status.chat.id, status.id, text).await {
            log::warn!("Failed to update broadcast status message: {}", e);
        }
    });
    Ok(())
}
