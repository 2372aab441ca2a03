//! Command logic. Each function applies one command to storage and the
//! scheduler and returns the reply text, so the dptree endpoints stay thin.

use std::time::Duration;

use quizcore::broadcast::BroadcastReport;
use quizcore::monitor::format_performance_report;
use quizcore::quiz::stats::{self, AnswerFeedback, AnswerOutcome, LEADERBOARD_SIZE};
use quizcore::quiz::QuizCatalog;
use quizcore::AppResult;

use super::types::HandlerDeps;
use crate::telegram::bot::parse_interval;

pub const WELCOME: &str = "Welcome! Use /sendgroup to start a quiz in a group or /prequiz to start a quiz personally.";
pub const GROUP_ONLY: &str = "This command can only be used in a group chat.";
pub const PRIVATE_ONLY: &str = "This command can only be used in a private chat.";
pub const NOT_AUTHORIZED: &str = "You are not authorized to use this command.";

/// Activates quizzes for the chat and starts its schedule. The first quiz is
/// queued right away.
pub fn start_quiz(deps: &HandlerDeps, chat_id: i64) -> AppResult<String> {
    let mut state = deps.store.get_chat_state(chat_id)?.unwrap_or_default();
    if state.active && deps.scheduler.is_scheduled(chat_id) {
        return Ok("A quiz is already running in this chat!".to_string());
    }

    state.active = true;
    state.paused = false;
    deps.store.put_chat_state(chat_id, &state)?;
    deps.scheduler
        .start_chat(chat_id, Duration::from_secs(state.interval_seconds));

    if !deps.scheduler.send_now(chat_id)? {
        log::warn!("First quiz for chat {} was not accepted, waiting for the schedule", chat_id);
    }
    Ok(format!("Quiz started! Interval: {} seconds.", state.interval_seconds))
}

/// Deactivates the chat. Its used-question history is kept.
pub fn stop_quiz(deps: &HandlerDeps, chat_id: i64) -> AppResult<String> {
    let was_scheduled = deps.scheduler.stop_chat(chat_id);
    let Some(mut state) = deps.store.get_chat_state(chat_id)? else {
        return Ok("No active quiz to stop.".to_string());
    };
    if !state.active && !was_scheduled {
        return Ok("No active quiz to stop.".to_string());
    }

    state.active = false;
    state.paused = false;
    deps.store.put_chat_state(chat_id, &state)?;
    Ok("Quiz stopped successfully.".to_string())
}

pub fn pause_quiz(deps: &HandlerDeps, chat_id: i64) -> AppResult<String> {
    let mut state = match deps.store.get_chat_state(chat_id)? {
        Some(state) if state.active => state,
        _ => return Ok("No active quiz to pause.".to_string()),
    };
    if state.paused {
        return Ok("Quiz is already paused. Use /resumequiz to continue.".to_string());
    }

    state.paused = true;
    deps.store.put_chat_state(chat_id, &state)?;
    Ok("Quiz paused. Use /resumequiz to continue.".to_string())
}

pub fn resume_quiz(deps: &HandlerDeps, chat_id: i64) -> AppResult<String> {
    let mut state = match deps.store.get_chat_state(chat_id)? {
        Some(state) if state.active => state,
        _ => return Ok("No active quiz to resume. Use /sendgroup or /prequiz to start one.".to_string()),
    };
    if !state.paused {
        return Ok("Quiz is not paused.".to_string());
    }

    state.paused = false;
    deps.store.put_chat_state(chat_id, &state)?;
    // The loop may have ended while the chat was paused across a restart
    if !deps.scheduler.is_scheduled(chat_id) {
        deps.scheduler
            .start_chat(chat_id, Duration::from_secs(state.interval_seconds));
    }
    Ok("Quiz resumed.".to_string())
}

/// Stores the new interval and restarts the loop when the chat is active.
pub fn set_interval(deps: &HandlerDeps, chat_id: i64, arg: &str) -> AppResult<String> {
    let seconds = match parse_interval(arg) {
        Ok(seconds) => seconds,
        Err(e) => return Ok(e.reply()),
    };

    let mut state = deps.store.get_chat_state(chat_id)?.unwrap_or_default();
    state.interval_seconds = seconds;
    deps.store.put_chat_state(chat_id, &state)?;

    if !state.active {
        return Ok("No active quiz. Interval saved for future quizzes.".to_string());
    }
    deps.scheduler.restart_chat(chat_id, Duration::from_secs(seconds));
    Ok(format!("Quiz interval updated to {} seconds. Restarting quiz...", seconds))
}

/// Switches the chat to another catalog and starts it from a clean slate.
pub fn set_category(deps: &HandlerDeps, chat_id: i64, arg: &str) -> AppResult<String> {
    let name = arg.trim().to_lowercase();
    if name.is_empty() {
        let current = deps
            .store
            .get_chat_state(chat_id)?
            .unwrap_or_default()
            .category;
        return Ok(format!(
            "Usage: /category <name>\nCurrent: {}\nAvailable: {}",
            current,
            available_categories(deps)
        ));
    }

    let has_questions = deps
        .catalog
        .get_questions(&name)
        .map(|questions| !questions.is_empty())
        .unwrap_or(false);
    if !has_questions {
        return Ok(format!(
            "Unknown category '{}'. Available: {}",
            name,
            available_categories(deps)
        ));
    }

    let mut state = deps.store.get_chat_state(chat_id)?.unwrap_or_default();
    if state.category != name {
        state.category = name.clone();
        state.used_question_ids.clear();
        deps.store.put_chat_state(chat_id, &state)?;
    }
    Ok(format!("Category set to {}.", name))
}

fn available_categories(deps: &HandlerDeps) -> String {
    match deps.catalog.categories() {
        Ok(names) if !names.is_empty() => names.join(", "),
        Ok(_) => "none".to_string(),
        Err(e) => {
            log::error!("Failed to list quiz categories: {}", e);
            "none".to_string()
        }
    }
}

pub fn send_now(deps: &HandlerDeps, chat_id: i64) -> AppResult<String> {
    if deps.scheduler.send_now(chat_id)? {
        Ok("Quiz on its way!".to_string())
    } else {
        Ok("The bot is busy right now. Please try again in a minute.".to_string())
    }
}

pub fn leaderboard(deps: &HandlerDeps) -> AppResult<String> {
    let entries = deps.store.top_scores(LEADERBOARD_SIZE)?;
    Ok(stats::format_leaderboard(&entries))
}

pub fn my_stats(deps: &HandlerDeps, user_id: i64) -> AppResult<String> {
    Ok(match stats::user_stats(deps.store.as_ref(), user_id)? {
        Some(user_stats) => stats::format_user_stats(&user_stats),
        None => "You haven't answered any quizzes yet. Join a quiz to get started!".to_string(),
    })
}

/// Scores a poll answer and returns the reply for the quiz message, if the
/// answer counted.
pub fn answer_poll(
    deps: &HandlerDeps,
    poll_id: &str,
    user_id: i64,
    display_name: &str,
    option_ids: &[u8],
) -> AppResult<Option<AnswerFeedback>> {
    let outcome = stats::record_answer(deps.store.as_ref(), poll_id, user_id, display_name, option_ids)?;
    if outcome == AnswerOutcome::Duplicate {
        log::debug!("Ignoring repeated answer from {} on poll {}", user_id, poll_id);
    }
    stats::answer_feedback(deps.store.as_ref(), poll_id, user_id, outcome)
}

pub fn quiz_stats(deps: &HandlerDeps) -> String {
    stats::format_pool_stats(&deps.pool.get_stats())
}

pub fn performance(deps: &HandlerDeps) -> String {
    format_performance_report(&deps.monitor.get_performance_stats(), &deps.pool.get_stats())
}

pub fn format_broadcast_report(report: &BroadcastReport) -> String {
    let mut text = format!(
        "Broadcast completed!\n✅ Sent to {} chats\n👤 Sent to {} users\n❌ Failed: {}",
        report.chats, report.users, report.failed
    );
    if report.aborted {
        text.push_str("\n⚠️ Stopped early under resource pressure");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_broadcast_report_text() {
        let report = BroadcastReport {
            chats: 3,
            users: 5,
            failed: 1,
            aborted: false,
        };
        assert_eq!(
            format_broadcast_report(&report),
            "Broadcast completed!\n✅ Sent to 3 chats\n👤 Sent to 5 users\n❌ Failed: 1"
        );

        let aborted = BroadcastReport {
            aborted: true,
            ..report
        };
        assert!(format_broadcast_report(&aborted).ends_with("resource pressure"));
    }
}
