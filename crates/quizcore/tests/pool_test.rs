//! Integration tests for the worker pool: admission, saturation, stats and
//! shutdown.
//!
//! Run with: cargo test -p quizcore --test pool_test

mod common;

use pretty_assertions::assert_eq;
use std::time::Duration;

use common::{pool_config, wait_until, FakeMessenger, Harness, StaticCatalog};
use quizcore::quiz::task::priority;
use quizcore::DeliveryError;

const CHAT: i64 = -100_300;

#[tokio::test(start_paused = true)]
async fn test_closed_gate_rejects_and_leaves_queue_unchanged() {
    let harness = Harness::general(3, 2);
    assert!(harness.pool.schedule(CHAT, "general", priority::SCHEDULED));
    assert_eq!(harness.pool.queue().size(), 1);

    harness.pool.admission().pause_intake(Duration::from_secs(60));

    assert!(!harness.pool.schedule(CHAT, "general", priority::MANUAL));
    assert!(!harness.pool.schedule(-7, "general", priority::SCHEDULED));
    assert_eq!(harness.pool.queue().size(), 1);
    assert_eq!(harness.metrics.queue_rejected_total.get(), 2);
    assert!(!harness.pool.get_stats().accepting_new);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_task_is_refused() {
    let harness = Harness::general(3, 2);
    assert!(!harness.pool.schedule(CHAT, "   ", priority::SCHEDULED));
    assert!(harness.pool.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_delivers_queued_tasks() {
    let harness = Harness::general(5, 2);
    harness.pool.start();

    for chat in [-1, -2, -3] {
        assert!(harness.pool.schedule(chat, "general", priority::SCHEDULED));
    }
    wait_until(|| harness.pool.get_stats().total_sent == 3).await;

    let stats = harness.pool.get_stats();
    assert_eq!(stats.tasks_executed, 3);
    assert_eq!(stats.failed_attempts, 0);
    assert_eq!(stats.queued_tasks, 0);
    assert_eq!(harness.metrics.quiz_sent_total.get(), 3);

    harness.pool.stop().await;
    assert!(!harness.pool.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_count_one_failed_attempt() {
    let harness = Harness::new(
        FakeMessenger::failing_always(DeliveryError::transient("connection reset")),
        StaticCatalog::with_questions("general", 3),
        pool_config(2),
    );
    harness.pool.start();
    assert!(harness.pool.schedule(CHAT, "general", priority::SCHEDULED));

    wait_until(|| harness.pool.get_stats().tasks_executed == 1).await;
    // Nothing else runs for this task afterwards
    tokio::time::sleep(Duration::from_secs(10)).await;

    let stats = harness.pool.get_stats();
    assert_eq!(harness.messenger.poll_calls(), 4);
    assert_eq!(stats.failed_attempts, 1);
    assert_eq!(stats.total_sent, 0);
    harness.pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_success_is_counted() {
    let harness = Harness::new(
        FakeMessenger::failing_first(1, DeliveryError::rate_limited(Duration::from_secs(3))),
        StaticCatalog::with_questions("general", 3),
        pool_config(2),
    );
    harness.pool.start();
    assert!(harness.pool.schedule(CHAT, "general", priority::SCHEDULED));

    wait_until(|| harness.pool.get_stats().total_sent == 1).await;
    assert_eq!(harness.pool.get_stats().retry_success, 1);
    harness.pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_are_monotonic_and_bounded_by_executions() {
    let harness = Harness::new(
        FakeMessenger::failing_first(6, DeliveryError::permanent("Forbidden: bot was kicked")),
        StaticCatalog::with_questions("general", 20),
        pool_config(3),
    );
    harness.pool.start();

    let mut last = harness.pool.get_stats();
    for round in 0..12i64 {
        harness.pool.schedule(-(round + 1), "general", priority::SCHEDULED);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = harness.pool.get_stats();
        assert!(stats.total_sent >= last.total_sent);
        assert!(stats.failed_attempts >= last.failed_attempts);
        assert!(stats.total_sent + stats.failed_attempts <= stats.tasks_executed);
        last = stats;
    }

    wait_until(|| harness.pool.get_stats().tasks_executed == 12).await;
    let stats = harness.pool.get_stats();
    assert_eq!(stats.failed_attempts, 6);
    assert_eq!(stats.total_sent, 6);
    harness.pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_requeues_and_keeps_priority() {
    let harness = Harness::new(
        FakeMessenger::new().with_delay(Duration::from_secs(5)),
        StaticCatalog::with_questions("general", 10),
        pool_config(1),
    );
    harness.pool.start();

    for chat in [1, 2, 3] {
        assert!(harness.pool.schedule(chat, "general", priority::SCHEDULED));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.pool.get_stats().active_threads, 1);
    // Chat 2 was taken off the queue, found no free slot and went back
    assert_eq!(harness.pool.queue().size(), 2);

    assert!(harness.pool.schedule(4, "general", priority::MANUAL));
    wait_until(|| harness.pool.get_stats().total_sent == 4).await;

    let order: Vec<i64> = harness.messenger.polls.lock().iter().map(|poll| poll.chat_id).collect();
    assert_eq!(order, vec![1, 4, 2, 3]);
    harness.pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_chat_returns_after_delivery() {
    let harness = Harness::new(
        FakeMessenger::new().with_delay(Duration::from_secs(5)),
        StaticCatalog::with_questions("general", 3),
        pool_config(2),
    );
    harness.pool.start();
    assert!(harness.pool.schedule(CHAT, "general", priority::MANUAL));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.pool.get_stats().total_sent, 0);

    harness.pool.wait_for_chat(CHAT).await;
    assert_eq!(harness.pool.get_stats().total_sent, 1);

    // Idle chats return immediately
    harness.pool.wait_for_chat(-1).await;
    harness.pool.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_bounded_and_keeps_queued_tasks() {
    let harness = Harness::new(
        FakeMessenger::new().with_delay(Duration::from_secs(60)),
        StaticCatalog::with_questions("general", 3),
        pool_config(1),
    );
    harness.pool.start();
    assert!(harness.pool.schedule(1, "general", priority::SCHEDULED));
    assert!(harness.pool.schedule(2, "general", priority::SCHEDULED));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    harness.pool.stop().await;

    // Grace period is 1s; the 60s delivery is abandoned
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!harness.pool.is_running());
    assert_eq!(harness.pool.queue().size(), 1);
    assert_eq!(harness.pool.get_stats().total_sent, 0);
    assert_eq!(harness.pool.get_stats().active_threads, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_pool_refuses_restart() {
    let harness = Harness::general(3, 2);
    harness.pool.start();
    harness.pool.stop().await;

    harness.pool.start();
    assert!(!harness.pool.is_running());

    assert!(harness.pool.schedule(CHAT, "general", priority::MANUAL));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.pool.get_stats().total_sent, 0);
    assert_eq!(harness.pool.queue().size(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_empties_queue() {
    let harness = Harness::general(3, 1);
    for chat in 1..=5 {
        harness.pool.schedule(chat, "general", priority::SCHEDULED);
    }
    assert_eq!(harness.pool.drain(), 5);
    assert_eq!(harness.pool.get_stats().queued_tasks, 0);
    assert_eq!(harness.pool.get_stats().active_chat_count, 0);
}
