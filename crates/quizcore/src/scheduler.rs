//! Per-chat quiz schedules.
//!
//! Every active chat gets one interval loop guarded by its own
//! [`CancellationToken`]. Each tick checks that the bot is still in the chat
//! and enqueues a scheduled quiz task; the pool does the rest.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::config;
use crate::core::error::AppResult;
use crate::quiz::messenger::MembershipChecker;
use crate::quiz::pool::WorkerPool;
use crate::quiz::task::priority;
use crate::storage::{ChatState, QuizStore};

/// What a loop does after one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Continue,
    Stop,
}

struct ChatJob {
    token: CancellationToken,
    /// Distinguishes a restarted loop from the one it replaced
    generation: u64,
    interval: Duration,
    handle: JoinHandle<()>,
}

pub struct QuizScheduler {
    pool: Arc<WorkerPool>,
    store: Arc<dyn QuizStore>,
    membership: Arc<dyn MembershipChecker>,
    jobs: Mutex<HashMap<i64, ChatJob>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl QuizScheduler {
    pub fn new(pool: Arc<WorkerPool>, store: Arc<dyn QuizStore>, membership: Arc<dyn MembershipChecker>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            store,
            membership,
            jobs: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// Starts (or replaces) the loop for `chat_id`. The first quiz arrives
    /// one interval from now. Intervals below the minimum are raised to it.
    pub fn start_chat(self: &Arc<Self>, chat_id: i64, interval: Duration) {
        let interval = interval.max(Duration::from_secs(config::schedule::MIN_INTERVAL_SECS));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();

        let mut jobs = self.jobs.lock();
        if let Some(previous) = jobs.remove(&chat_id) {
            previous.token.cancel();
        }

        let scheduler = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_chat(chat_id, interval, loop_token).await;
            scheduler.forget(chat_id, generation);
        });

        jobs.insert(
            chat_id,
            ChatJob {
                token,
                generation,
                interval,
                handle,
            },
        );
        log::info!("Scheduled quizzes for chat {} every {:?}", chat_id, interval);
    }

    /// Cancels the loop for `chat_id`. Returns false if none was running.
    pub fn stop_chat(&self, chat_id: i64) -> bool {
        match self.jobs.lock().remove(&chat_id) {
            Some(job) => {
                job.token.cancel();
                log::info!("Stopped quiz schedule for chat {}", chat_id);
                true
            }
            None => false,
        }
    }

    /// Replaces the loop with one on the new interval.
    pub fn restart_chat(self: &Arc<Self>, chat_id: i64, interval: Duration) {
        self.start_chat(chat_id, interval);
    }

    pub fn is_scheduled(&self, chat_id: i64) -> bool {
        self.jobs.lock().contains_key(&chat_id)
    }

    pub fn interval_for(&self, chat_id: i64) -> Option<Duration> {
        self.jobs.lock().get(&chat_id).map(|job| job.interval)
    }

    pub fn scheduled_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Enqueues one quiz ahead of scheduled ones. Returns whether the pool
    /// accepted it.
    pub fn send_now(&self, chat_id: i64) -> AppResult<bool> {
        let state = self.store.get_chat_state(chat_id)?.unwrap_or_default();
        Ok(self.pool.schedule(chat_id, &state.category, priority::MANUAL))
    }

    /// Starts a loop for every chat marked active in storage. Used at startup.
    pub fn reseed(self: &Arc<Self>) -> AppResult<usize> {
        let mut started = 0;
        for chat_id in self.store.list_active()? {
            let Some(state) = self.store.get_chat_state(chat_id)? else {
                continue;
            };
            self.start_chat(chat_id, Duration::from_secs(state.interval_seconds));
            started += 1;
        }
        log::info!("Restored quiz schedules for {} chat(s)", started);
        Ok(started)
    }

    /// Cancels every loop and waits for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let jobs: Vec<ChatJob> = self.jobs.lock().drain().map(|(_, job)| job).collect();
        for job in jobs {
            if let Err(e) = job.handle.await {
                log::error!("Quiz schedule task ended abnormally: {}", e);
            }
        }
    }

    async fn run_chat(&self, chat_id: i64, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.tick(chat_id).await == TickAction::Stop {
                break;
            }
        }
    }

    /// One scheduled tick for `chat_id`.
    pub async fn tick(&self, chat_id: i64) -> TickAction {
        let state: ChatState = match self.store.get_chat_state(chat_id) {
            Ok(Some(state)) => state,
            Ok(None) => return TickAction::Stop,
            Err(e) => {
                log::error!("Failed to load state for chat {}: {}", chat_id, e);
                return TickAction::Continue;
            }
        };
        if !state.active {
            return TickAction::Stop;
        }
        if state.paused {
            return TickAction::Continue;
        }

        match self.membership.is_bot_member(chat_id).await {
            Ok(true) => {}
            Ok(false) => {
                log::info!("Bot is no longer in chat {}, deactivating quizzes", chat_id);
                if let Err(e) = self.store.set_active(chat_id, false) {
                    log::error!("Failed to deactivate chat {}: {}", chat_id, e);
                }
                return TickAction::Stop;
            }
            // Keep the schedule on transient lookup failures
            Err(e) => log::warn!("Membership check for chat {} failed: {}", chat_id, e),
        }

        if !self.pool.schedule(chat_id, &state.category, priority::SCHEDULED) {
            log::debug!("Scheduled quiz for chat {} was not accepted", chat_id);
        }
        TickAction::Continue
    }

    fn forget(&self, chat_id: i64, generation: u64) {
        let mut jobs = self.jobs.lock();
        if jobs.get(&chat_id).is_some_and(|job| job.generation == generation) {
            jobs.remove(&chat_id);
        }
    }
}
