//! Integration tests for the command logic behind the dptree endpoints.
//!
//! Run with: cargo test -p quizbot --test commands_test

mod common;

use pretty_assertions::assert_eq;
use std::time::Duration;

use common::{Fixture, ADMIN};
use quizbot::telegram::handlers::commands;
use quizcore::quiz::stats::{self, AnswerOutcome};
use quizcore::quiz::task::priority;
use quizcore::storage::{ChatState, ChatStateStore, PollLedger, PollRecord};

const GROUP: i64 = -100_777;

#[tokio::test(start_paused = true)]
async fn test_start_quiz_activates_and_queues_first_quiz() {
    let f = Fixture::new();

    let reply = commands::start_quiz(&f.deps, GROUP).unwrap();
    assert_eq!(reply, "Quiz started! Interval: 30 seconds.");

    let state = f.store.get_chat_state(GROUP).unwrap().unwrap();
    assert!(state.active);
    assert!(f.deps.scheduler.is_scheduled(GROUP));

    let first = f.deps.pool.queue().try_dequeue().unwrap();
    assert_eq!(first.chat_id, GROUP);
    assert_eq!(first.priority, priority::MANUAL);

    assert_eq!(
        commands::start_quiz(&f.deps, GROUP).unwrap(),
        "A quiz is already running in this chat!"
    );
    f.deps.scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_quiz_deactivates_once() {
    let f = Fixture::new();
    assert_eq!(commands::stop_quiz(&f.deps, GROUP).unwrap(), "No active quiz to stop.");

    commands::start_quiz(&f.deps, GROUP).unwrap();
    assert_eq!(commands::stop_quiz(&f.deps, GROUP).unwrap(), "Quiz stopped successfully.");
    assert!(!f.deps.scheduler.is_scheduled(GROUP));
    assert!(!f.store.get_chat_state(GROUP).unwrap().unwrap().active);

    assert_eq!(commands::stop_quiz(&f.deps, GROUP).unwrap(), "No active quiz to stop.");
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let f = Fixture::new();
    assert_eq!(commands::pause_quiz(&f.deps, GROUP).unwrap(), "No active quiz to pause.");

    commands::start_quiz(&f.deps, GROUP).unwrap();
    assert_eq!(
        commands::pause_quiz(&f.deps, GROUP).unwrap(),
        "Quiz paused. Use /resumequiz to continue."
    );
    assert!(f.store.get_chat_state(GROUP).unwrap().unwrap().paused);
    assert!(commands::pause_quiz(&f.deps, GROUP).unwrap().starts_with("Quiz is already paused"));

    // A restart while paused leaves no loop behind
    f.deps.scheduler.stop_chat(GROUP);
    assert_eq!(commands::resume_quiz(&f.deps, GROUP).unwrap(), "Quiz resumed.");
    assert!(!f.store.get_chat_state(GROUP).unwrap().unwrap().paused);
    assert!(f.deps.scheduler.is_scheduled(GROUP));
    assert_eq!(commands::resume_quiz(&f.deps, GROUP).unwrap(), "Quiz is not paused.");
    f.deps.scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_saves_for_inactive_chat() {
    let f = Fixture::new();

    assert_eq!(
        commands::set_interval(&f.deps, GROUP, "45").unwrap(),
        "No active quiz. Interval saved for future quizzes."
    );
    let state = f.store.get_chat_state(GROUP).unwrap().unwrap();
    assert_eq!(state.interval_seconds, 45);
    assert!(!state.active);
    assert!(!f.deps.scheduler.is_scheduled(GROUP));

    assert_eq!(
        commands::start_quiz(&f.deps, GROUP).unwrap(),
        "Quiz started! Interval: 45 seconds."
    );
    f.deps.scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_interval_restarts_active_loop() {
    let f = Fixture::new();
    commands::start_quiz(&f.deps, GROUP).unwrap();

    assert_eq!(
        commands::set_interval(&f.deps, GROUP, "15").unwrap(),
        "Quiz interval updated to 15 seconds. Restarting quiz..."
    );
    assert_eq!(f.deps.scheduler.interval_for(GROUP), Some(Duration::from_secs(15)));

    assert_eq!(
        commands::set_interval(&f.deps, GROUP, "5").unwrap(),
        "Interval must be at least 10 seconds."
    );
    assert_eq!(
        commands::set_interval(&f.deps, GROUP, "").unwrap(),
        "Usage: /setinterval <seconds>"
    );
    assert_eq!(f.store.get_chat_state(GROUP).unwrap().unwrap().interval_seconds, 15);
    f.deps.scheduler.shutdown().await;
}

#[tokio::test]
async fn test_category_switch_resets_progress() {
    let f = Fixture::new();
    let mut state = ChatState::new("general");
    state.used_question_ids.insert("g1".to_string());
    f.store.put_chat_state(GROUP, &state).unwrap();

    let usage = commands::set_category(&f.deps, GROUP, "").unwrap();
    assert!(usage.contains("Current: general"));
    assert!(usage.contains("Available: general, science"));

    let unknown = commands::set_category(&f.deps, GROUP, "astrology").unwrap();
    assert!(unknown.starts_with("Unknown category 'astrology'"));
    assert_eq!(f.store.get_chat_state(GROUP).unwrap().unwrap().category, "general");

    assert_eq!(
        commands::set_category(&f.deps, GROUP, " Science ").unwrap(),
        "Category set to science."
    );
    let state = f.store.get_chat_state(GROUP).unwrap().unwrap();
    assert_eq!(state.category, "science");
    assert!(state.used_question_ids.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_now_reports_busy_pool() {
    let f = Fixture::new();
    assert_eq!(commands::send_now(&f.deps, GROUP).unwrap(), "Quiz on its way!");

    f.deps.pool.admission().pause_intake(Duration::from_secs(60));
    assert_eq!(
        commands::send_now(&f.deps, GROUP).unwrap(),
        "The bot is busy right now. Please try again in a minute."
    );
    assert_eq!(f.deps.pool.queue().size(), 1);
}

#[tokio::test]
async fn test_leaderboard_and_stats_follow_answers() {
    let f = Fixture::new();
    assert!(commands::leaderboard(&f.deps).unwrap().starts_with("🏆 No scores yet!"));
    assert!(commands::my_stats(&f.deps, 42).unwrap().starts_with("You haven't answered"));

    f.store
        .record_poll(&PollRecord {
            poll_id: "p1".to_string(),
            chat_id: GROUP,
            message_id: 7,
            question_id: "g1".to_string(),
            correct_option: 1,
        })
        .unwrap();
    let outcome = stats::record_answer(f.store.as_ref(), "p1", 42, "Ada", &[1]).unwrap();
    assert_eq!(outcome, AnswerOutcome::Scored { correct: true, points: 2 });

    let board = commands::leaderboard(&f.deps).unwrap();
    assert!(board.contains("🥇 Ada - 2 points"));
    let mine = commands::my_stats(&f.deps, 42).unwrap();
    assert!(mine.contains("Score: 2"));
    assert!(mine.contains("Accuracy: 100%"));
}

#[tokio::test]
async fn test_answer_gets_reply_under_quiz_message() {
    let f = Fixture::new();
    f.store
        .record_poll(&PollRecord {
            poll_id: "p9".to_string(),
            chat_id: GROUP,
            message_id: 31,
            question_id: "g2".to_string(),
            correct_option: 0,
        })
        .unwrap();

    let right = commands::answer_poll(&f.deps, "p9", 42, "Ada", &[0]).unwrap().unwrap();
    assert_eq!(right.chat_id, GROUP);
    assert_eq!(right.reply_to, 31);
    assert!(right
        .text
        .starts_with("📝 Answer by Ada\n✅ Correct! (+2 points)\nCurrent Score: 2 points\nRank: #1\nTime: "));

    let wrong = commands::answer_poll(&f.deps, "p9", 43, "Bob", &[1]).unwrap().unwrap();
    assert!(wrong
        .text
        .starts_with("📝 Answer by Bob\n❌ Wrong! (0 points)\nCurrent Score: 0 points\nRank: #2\n"));

    // Repeats, retractions and foreign polls are scored silently
    assert_eq!(commands::answer_poll(&f.deps, "p9", 42, "Ada", &[1]).unwrap(), None);
    assert_eq!(commands::answer_poll(&f.deps, "p9", 44, "Cy", &[]).unwrap(), None);
    assert_eq!(commands::answer_poll(&f.deps, "other", 44, "Cy", &[0]).unwrap(), None);
}

#[tokio::test]
async fn test_admin_reports() {
    let f = Fixture::new();
    assert!(f.deps.is_admin(ADMIN));
    assert!(!f.deps.is_admin(42));

    assert!(commands::quiz_stats(&f.deps).contains("Queued: 0"));
    assert!(commands::performance(&f.deps).contains("No samples yet"));

    f.deps.monitor.check().unwrap();
    assert!(commands::performance(&f.deps).contains("Memory: 10.0 MB"));
}
