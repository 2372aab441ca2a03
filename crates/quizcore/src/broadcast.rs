//! Admin broadcast fan-out to every served chat and user.
//!
//! Targets are sent in batches of the live `batch_size`. Within a batch up to
//! `max_workers` sends run concurrently, started one `send_interval` apart so
//! the live rate limit holds. A paused intake defers the next batch until the
//! gate reopens; a halt or a drain from the resource monitor aborts the rest.

use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::metrics::Metrics;
use crate::core::retry::{retry, RetryConfig};
use crate::quiz::admission::{AdmissionControl, Throttle, ThrottleLimits};
use crate::quiz::messenger::{BroadcastContent, QuizMessenger};
use crate::storage::QuizStore;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Concurrent sends within one batch
    pub max_workers: usize,
    /// Pause between batches
    pub batch_pause: Duration,
    /// Per-message retry policy
    pub retry: RetryConfig,
    pub throttle: ThrottleLimits,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_workers: config::broadcast::MAX_WORKERS,
            batch_pause: config::broadcast::batch_pause(),
            retry: RetryConfig::default(),
            throttle: ThrottleLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Chats that received the message
    pub chats: usize,
    /// Users that received the message
    pub users: usize,
    pub failed: usize,
    /// Stopped early by a halt or a drain
    pub aborted: bool,
}

#[derive(Debug, Default)]
struct Tally {
    sent: usize,
    failed: usize,
    aborted: bool,
}

/// Clears the in-progress flag when a broadcast ends, however it ends.
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BroadcastManager {
    config: BroadcastConfig,
    store: Arc<dyn QuizStore>,
    messenger: Arc<dyn QuizMessenger>,
    admission: Arc<AdmissionControl>,
    in_progress: AtomicBool,
    abort: AtomicBool,
    aborted: Notify,
    /// Targets not yet attempted in the running broadcast
    pending: AtomicUsize,
    metrics: Arc<Metrics>,
}

impl BroadcastManager {
    pub fn new(
        config: BroadcastConfig,
        store: Arc<dyn QuizStore>,
        messenger: Arc<dyn QuizMessenger>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let admission = AdmissionControl::new("broadcast", config.throttle);
        Arc::new(Self {
            config,
            store,
            messenger,
            admission,
            in_progress: AtomicBool::new(false),
            abort: AtomicBool::new(false),
            aborted: Notify::new(),
            pending: AtomicUsize::new(0),
            metrics,
        })
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Sends `content` to every served chat, then to every served user that
    /// was not already reached as a chat.
    pub async fn broadcast(&self, content: &BroadcastContent) -> AppResult<BroadcastReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::Validation("a broadcast is already running".to_string()));
        }
        let _running = InProgress(&self.in_progress);
        self.abort.store(false, Ordering::SeqCst);

        let chats = self.store.served_chats()?;
        let seen: HashSet<i64> = chats.iter().copied().collect();
        let users: Vec<i64> = self
            .store
            .served_users()?
            .into_iter()
            .filter(|user_id| !seen.contains(user_id))
            .collect();
        self.pending.store(chats.len() + users.len(), Ordering::SeqCst);

        log::info!("Broadcasting to {} chat(s) and {} user(s)", chats.len(), users.len());

        let mut report = BroadcastReport::default();
        let tally = self.send_all(&chats, content).await;
        report.chats = tally.sent;
        report.failed = tally.failed;
        report.aborted = tally.aborted;

        if !report.aborted {
            let tally = self.send_all(&users, content).await;
            report.users = tally.sent;
            report.failed += tally.failed;
            report.aborted = tally.aborted;
        }
        self.pending.store(0, Ordering::SeqCst);

        log::info!(
            "Broadcast finished: {} chat(s), {} user(s), {} failed{}",
            report.chats,
            report.users,
            report.failed,
            if report.aborted { " (aborted)" } else { "" }
        );
        Ok(report)
    }

    async fn send_all(&self, targets: &[i64], content: &BroadcastContent) -> Tally {
        let mut tally = Tally::default();
        let mut offset = 0;

        while offset < targets.len() {
            if self.should_abort() {
                tally.aborted = true;
                break;
            }
            if !self.admission.is_accepting() {
                log::warn!("Broadcast waiting for intake to reopen");
                tokio::select! {
                    _ = self.admission.wait_until_open() => {}
                    _ = self.aborted.notified() => {}
                }
                continue;
            }

            let settings = self.admission.settings();
            let end = (offset + settings.batch_size.max(1)).min(targets.len());
            let batch = &targets[offset..end];
            let interval = settings.send_interval();
            let batch_start = tokio::time::Instant::now();

            let results: Vec<bool> = stream::iter(batch.iter().copied().enumerate())
                .map(|(index, chat_id)| async move {
                    let stagger = interval.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
                    tokio::time::sleep_until(batch_start + stagger).await;
                    self.send_one(chat_id, content).await
                })
                .buffer_unordered(self.config.max_workers.max(1))
                .collect()
                .await;

            for delivered in results {
                if delivered {
                    tally.sent += 1;
                    self.metrics.broadcast_sent_total.inc();
                } else {
                    tally.failed += 1;
                    self.metrics.broadcast_failed_total.inc();
                }
            }
            let _ = self
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| Some(left.saturating_sub(batch.len())));

            offset = end;
            if offset < targets.len() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.batch_pause) => {}
                    _ = self.aborted.notified() => {}
                }
            }
        }
        tally
    }

    async fn send_one(&self, chat_id: i64, content: &BroadcastContent) -> bool {
        let outcome = retry(&self.config.retry, || self.messenger.send_broadcast(chat_id, content)).await;
        match outcome.result {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "Broadcast to {} failed after {} attempt(s): {}",
                    chat_id,
                    outcome.attempts,
                    e.last_error()
                );
                false
            }
        }
    }

    fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst) || self.admission.is_halted()
    }
}

impl Throttle for BroadcastManager {
    fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    fn in_flight(&self) -> usize {
        usize::from(self.is_running())
    }

    fn drain_pending(&self) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.abort.store(true, Ordering::SeqCst);
        self.aborted.notify_waiters();
        let dropped = self.pending.swap(0, Ordering::SeqCst);
        log::warn!("Aborting broadcast, {} target(s) not reached", dropped);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::DeliveryError;
    use crate::quiz::messenger::PollReceipt;
    use crate::storage::{MemoryStore, ServedStore};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<i64>>,
        failing: HashSet<i64>,
    }

    #[async_trait]
    impl QuizMessenger for RecordingMessenger {
        async fn send_poll(
            &self,
            _chat_id: i64,
            _question: &str,
            _options: &[String],
            _correct_option: u8,
            _anonymous: bool,
        ) -> Result<PollReceipt, DeliveryError> {
            Err(DeliveryError::permanent("not used"))
        }

        async fn send_notice(&self, _chat_id: i64, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }

        async fn send_broadcast(&self, chat_id: i64, _content: &BroadcastContent) -> Result<(), DeliveryError> {
            if self.failing.contains(&chat_id) {
                return Err(DeliveryError::permanent("bot was blocked by the user"));
            }
            self.sent.lock().push(chat_id);
            Ok(())
        }
    }

    fn manager(store: Arc<MemoryStore>, messenger: Arc<RecordingMessenger>) -> Arc<BroadcastManager> {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = BroadcastConfig {
            retry: RetryConfig::new().max_retries(0),
            ..BroadcastConfig::default()
        };
        BroadcastManager::new(config, store, messenger, metrics)
    }

    fn served(chats: &[i64], users: &[i64]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for chat in chats {
            store.add_served_chat(*chat).unwrap();
        }
        for user in users {
            store.add_served_user(*user).unwrap();
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_to_chats_then_users_without_duplicates() {
        let store = served(&[-1, -2, 7], &[7, 8]);
        let messenger = Arc::new(RecordingMessenger::default());
        let manager = manager(store, Arc::clone(&messenger));

        let report = manager
            .broadcast(&BroadcastContent::Text("hello".to_string()))
            .await
            .unwrap();

        assert_eq!(
            report,
            BroadcastReport {
                chats: 3,
                users: 1,
                failed: 0,
                aborted: false
            }
        );
        let mut sent = messenger.sent.lock().clone();
        sent.sort_unstable();
        assert_eq!(sent, vec![-2, -1, 7, 8]);
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_not_fatal() {
        let store = served(&[-1, -2], &[5]);
        let messenger = Arc::new(RecordingMessenger {
            failing: HashSet::from([-2]),
            ..Default::default()
        });
        let manager = manager(store, messenger);

        let report = manager.broadcast(&BroadcastContent::Text("hi".to_string())).await.unwrap();
        assert_eq!(report.chats, 1);
        assert_eq!(report.users, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_aborts_before_sending() {
        let store = served(&[-1, -2], &[]);
        let messenger = Arc::new(RecordingMessenger::default());
        let manager = manager(store, Arc::clone(&messenger));

        manager.admission().halt(Duration::from_secs(120));
        let report = manager.broadcast(&BroadcastContent::Text("hi".to_string())).await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.chats, 0);
        assert!(messenger.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_intake_defers_batch() {
        let store = served(&[-1], &[]);
        let messenger = Arc::new(RecordingMessenger::default());
        let manager = manager(store, Arc::clone(&messenger));

        manager.admission().pause_intake(Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let report = manager.broadcast(&BroadcastContent::Text("hi".to_string())).await.unwrap();

        assert_eq!(report.chats, 1);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_follow_live_batch_size() {
        let chats: Vec<i64> = (1..=60).map(|id| -id).collect();
        let store = served(&chats, &[]);
        let messenger = Arc::new(RecordingMessenger::default());
        let manager = manager(store, Arc::clone(&messenger));

        // Warning tier halves the batch to 50, so 60 chats take two batches
        manager.admission().degrade_warning();
        let started = tokio::time::Instant::now();
        let report = manager.broadcast(&BroadcastContent::Text("hi".to_string())).await.unwrap();

        assert_eq!(report.chats, 60);
        assert!(started.elapsed() >= manager.config.batch_pause);
    }

    #[tokio::test]
    async fn test_drain_is_noop_when_idle() {
        let manager = manager(served(&[], &[]), Arc::new(RecordingMessenger::default()));
        assert_eq!(manager.drain_pending(), 0);
    }
}
