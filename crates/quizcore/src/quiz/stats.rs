//! Answer scoring and the leaderboard / user statistics views.

use chrono::{DateTime, Utc};

use super::pool::WorkerPoolStats;
use crate::core::error::AppResult;
use crate::storage::{QuizAttempt, QuizStore, ScoreEntry};

pub const CORRECT_POINTS: i64 = 2;
pub const WRONG_POINTS: i64 = 0;
/// Entries shown by `/leaderboard`
pub const LEADERBOARD_SIZE: usize = 20;
/// Attempts listed under "Recent activity"
pub const RECENT_ATTEMPTS: usize = 5;

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

/// Result of scoring one poll answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The poll is not in the ledger (sent before a restart, or not ours)
    UnknownPoll,
    /// The user withdrew their vote
    Retracted,
    /// Only the first answer to a poll counts
    Duplicate,
    Scored { correct: bool, points: i64 },
}

/// Scores a poll answer and records the attempt.
pub fn record_answer(
    store: &dyn QuizStore,
    poll_id: &str,
    user_id: i64,
    display_name: &str,
    chosen: &[u8],
) -> AppResult<AnswerOutcome> {
    let Some(&choice) = chosen.first() else {
        return Ok(AnswerOutcome::Retracted);
    };
    let Some(poll) = store.find_poll(poll_id)? else {
        log::debug!("Answer for unknown poll {} from user {}", poll_id, user_id);
        return Ok(AnswerOutcome::UnknownPoll);
    };
    if store.has_answered(user_id, poll_id)? {
        return Ok(AnswerOutcome::Duplicate);
    }

    let correct = choice == poll.correct_option;
    let points = if correct { CORRECT_POINTS } else { WRONG_POINTS };

    store.record_attempt(&QuizAttempt {
        user_id,
        poll_id: poll_id.to_string(),
        correct,
        points,
        answered_at: Utc::now(),
    })?;
    store.add_score(user_id, display_name, points)?;

    log::info!(
        "Recorded answer from {} ({}) in chat {}: {}",
        display_name,
        user_id,
        poll.chat_id,
        if correct { "correct" } else { "wrong" }
    );
    Ok(AnswerOutcome::Scored { correct, points })
}

/// Reply posted under the quiz message once an answer is scored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub chat_id: i64,
    /// The poll message being answered
    pub reply_to: i32,
    pub text: String,
}

/// Builds the feedback for a scored answer from the poll ledger and the
/// voter's updated standing. Other outcomes get no reply.
pub fn answer_feedback(
    store: &dyn QuizStore,
    poll_id: &str,
    user_id: i64,
    outcome: AnswerOutcome,
) -> AppResult<Option<AnswerFeedback>> {
    let AnswerOutcome::Scored { correct, points } = outcome else {
        return Ok(None);
    };
    let Some(poll) = store.find_poll(poll_id)? else {
        return Ok(None);
    };
    let Some(stats) = user_stats(store, user_id)? else {
        return Ok(None);
    };

    Ok(Some(AnswerFeedback {
        chat_id: poll.chat_id,
        reply_to: poll.message_id,
        text: format_answer_feedback(&stats.display_name, correct, points, stats.score, stats.rank, Utc::now()),
    }))
}

pub fn format_answer_feedback(
    display_name: &str,
    correct: bool,
    points: i64,
    score: i64,
    rank: usize,
    at: DateTime<Utc>,
) -> String {
    let verdict = if correct {
        format!("✅ Correct! (+{} points)", points)
    } else {
        format!("❌ Wrong! ({} points)", points)
    };
    format!(
        "📝 Answer by {}\n{}\nCurrent Score: {} points\nRank: #{}\nTime: {}",
        display_name,
        verdict,
        score,
        rank,
        at.format("%Y-%m-%d %H:%M:%S")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub display_name: String,
    pub score: i64,
    /// 1-based; users with equal scores share a rank
    pub rank: usize,
    /// Share of users with a strictly lower score, 0..=100
    pub percentile: f64,
    pub total_attempts: usize,
    pub correct_answers: usize,
    pub incorrect_answers: usize,
    pub accuracy: f64,
    /// Newest first, at most [`RECENT_ATTEMPTS`]
    pub recent: Vec<QuizAttempt>,
    pub first_attempt: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Statistics for one user, or `None` if they never answered.
pub fn user_stats(store: &dyn QuizStore, user_id: i64) -> AppResult<Option<UserStats>> {
    let scores = store.all_scores()?;
    let Some(entry) = scores.iter().find(|entry| entry.user_id == user_id) else {
        return Ok(None);
    };

    let higher = scores.iter().filter(|other| other.score > entry.score).count();
    let lower = scores.iter().filter(|other| other.score < entry.score).count();
    let percentile = round2(lower as f64 / scores.len() as f64 * 100.0);

    let attempts = store.attempts_for(user_id)?;
    let correct_answers = attempts.iter().filter(|attempt| attempt.correct).count();
    let accuracy = if attempts.is_empty() {
        0.0
    } else {
        round2(correct_answers as f64 / attempts.len() as f64 * 100.0)
    };

    Ok(Some(UserStats {
        display_name: entry.display_name.clone(),
        score: entry.score,
        rank: higher + 1,
        percentile,
        total_attempts: attempts.len(),
        correct_answers,
        incorrect_answers: attempts.len() - correct_answers,
        accuracy,
        first_attempt: attempts.last().map(|attempt| attempt.answered_at),
        last_attempt: attempts.first().map(|attempt| attempt.answered_at),
        recent: attempts.into_iter().take(RECENT_ATTEMPTS).collect(),
    }))
}

pub fn rank_badge(percentile: f64) -> &'static str {
    if percentile >= 90.0 {
        "🏆"
    } else if percentile >= 70.0 {
        "🌟"
    } else if percentile >= 50.0 {
        "⭐"
    } else {
        "🎯"
    }
}

pub fn format_leaderboard(entries: &[ScoreEntry]) -> String {
    if entries.is_empty() {
        return "🏆 No scores yet! Start playing to appear on the leaderboard.".to_string();
    }

    let mut message = String::from("🏆 Quiz Leaderboard 🏆\n\n");
    for (index, entry) in entries.iter().enumerate() {
        let place = match MEDALS.get(index) {
            Some(medal) => (*medal).to_string(),
            None => format!("#{}", index + 1),
        };
        message.push_str(&format!("{} {} - {} points\n", place, entry.display_name, entry.score));
    }
    message
}

pub fn format_user_stats(stats: &UserStats) -> String {
    let mut message = format!(
        "📊 Statistics for {} {}\n\n\
         Score: {} 📈\n\
         Global rank: #{} 🌍\n\
         Percentile: {}% 📊\n\n\
         Quiz performance\n\
         Total attempted: {} ✍️\n\
         Correct: {} ✅\n\
         Incorrect: {} ❌\n\
         Accuracy: {}% 🎯\n\n\
         Recent activity\n",
        stats.display_name,
        rank_badge(stats.percentile),
        stats.score,
        stats.rank,
        stats.percentile,
        stats.total_attempts,
        stats.correct_answers,
        stats.incorrect_answers,
        stats.accuracy,
    );

    if stats.recent.is_empty() {
        message.push_str("No recent activity\n");
    }
    for (index, attempt) in stats.recent.iter().enumerate() {
        let status = if attempt.correct {
            format!("✅ +{}", attempt.points)
        } else {
            "❌ 0".to_string()
        };
        message.push_str(&format!(
            "{}. {} ({})\n",
            index + 1,
            status,
            attempt.answered_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    if let (Some(first), Some(last)) = (stats.first_attempt, stats.last_attempt) {
        message.push_str(&format!(
            "\nFirst quiz: {}\nLast quiz: {}",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    message
}

/// Renders the admin `/quizstats` report.
pub fn format_pool_stats(stats: &WorkerPoolStats) -> String {
    format!(
        "📊 Quiz statistics\n\n\
         Sent: {}\n\
         Failed: {}\n\
         Recovered by retry: {}\n\
         Executed: {}\n\n\
         Workers: {}/{}\n\
         Queued: {}\n\
         Active chats: {}\n\
         Accepting tasks: {}",
        stats.total_sent,
        stats.failed_attempts,
        stats.retry_success,
        stats.tasks_executed,
        stats.active_threads,
        stats.max_workers,
        stats.queued_tasks,
        stats.active_chat_count,
        if stats.accepting_new { "yes" } else { "no" },
    )
}
