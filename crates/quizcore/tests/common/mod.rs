//! Common test utilities
//!
//! Fakes for the outbound bot interfaces, the catalog and the resource
//! sampler, shared across all integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quizcore::core::metrics::Metrics;
use quizcore::core::retry::RetryConfig;
use quizcore::monitor::{DiagnosticSnapshot, ResourceSample, ResourceSampler};
use quizcore::quiz::catalog::{Question, QuizCatalog};
use quizcore::quiz::delivery::{DailyLimits, QuizDelivery};
use quizcore::quiz::messenger::{BroadcastContent, MembershipChecker, PollReceipt, QuizMessenger};
use quizcore::quiz::pool::{WorkerPool, WorkerPoolConfig};
use quizcore::quiz::ThrottleLimits;
use quizcore::storage::MemoryStore;
use quizcore::{AppResult, DeliveryError};

pub const MB: u64 = 1024 * 1024;

/// One `send_poll` call as seen by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct SentPoll {
    pub chat_id: i64,
    pub question: String,
}

/// Records every call. Fails the first `fail_first` poll sends (or all of
/// them) with the configured error, and can hold each send for `delay`.
#[derive(Default)]
pub struct FakeMessenger {
    pub polls: Mutex<Vec<SentPoll>>,
    pub notices: Mutex<Vec<(i64, String)>>,
    pub broadcasts: Mutex<Vec<i64>>,
    poll_calls: AtomicU32,
    fail_first: Option<u32>,
    fail_always: bool,
    error: Option<DeliveryError>,
    delay: Option<Duration>,
    next_poll: AtomicU64,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_always(error: DeliveryError) -> Self {
        Self {
            fail_always: true,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn failing_first(count: u32, error: DeliveryError) -> Self {
        Self {
            fail_first: Some(count),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn delivered_to(&self, chat_id: i64) -> Vec<String> {
        self.polls
            .lock()
            .iter()
            .filter(|poll| poll.chat_id == chat_id)
            .map(|poll| poll.question.clone())
            .collect()
    }

    pub fn notices_for(&self, chat_id: i64, text: &str) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|(chat, notice)| *chat == chat_id && notice == text)
            .count()
    }

    fn should_fail(&self, call: u32) -> bool {
        self.fail_always || self.fail_first.is_some_and(|count| call <= count)
    }
}

#[async_trait]
impl QuizMessenger for FakeMessenger {
    async fn send_poll(
        &self,
        chat_id: i64,
        question: &str,
        _options: &[String],
        _correct_option: u8,
        _anonymous: bool,
    ) -> Result<PollReceipt, DeliveryError> {
        let call = self.poll_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.polls.lock().push(SentPoll {
            chat_id,
            question: question.to_string(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail(call) {
            if let Some(error) = &self.error {
                return Err(error.clone());
            }
        }

        let id = self.next_poll.fetch_add(1, Ordering::SeqCst);
        Ok(PollReceipt {
            poll_id: format!("poll-{}", id),
            message_id: i32::try_from(id).unwrap_or(i32::MAX),
        })
    }

    async fn send_notice(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.notices.lock().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_broadcast(&self, chat_id: i64, _content: &BroadcastContent) -> Result<(), DeliveryError> {
        self.broadcasts.lock().push(chat_id);
        Ok(())
    }
}

/// Catalog served from memory.
#[derive(Default)]
pub struct StaticCatalog {
    categories: HashMap<String, Arc<Vec<Question>>>,
    pub clears: AtomicU32,
}

impl StaticCatalog {
    /// `count` questions named `Question 1..=count` in `category`.
    pub fn with_questions(category: &str, count: usize) -> Self {
        let questions = (1..=count)
            .map(|n| Question {
                id: format!("{}-{}", category, n),
                text: format!("Question {}", n),
                options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
                correct_option: 0,
            })
            .collect();
        let mut categories = HashMap::new();
        categories.insert(category.to_string(), Arc::new(questions));
        Self {
            categories,
            clears: AtomicU32::new(0),
        }
    }
}

impl QuizCatalog for StaticCatalog {
    fn get_questions(&self, category: &str) -> AppResult<Arc<Vec<Question>>> {
        Ok(self
            .categories
            .get(category)
            .cloned()
            .unwrap_or_else(|| Arc::new(Vec::new())))
    }

    fn clear_cache(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sampler returning whatever the test last set.
pub struct FakeSampler {
    current: Mutex<ResourceSample>,
    failing: AtomicBool,
    diagnostics: Mutex<DiagnosticSnapshot>,
}

impl FakeSampler {
    pub fn new(memory_mb: u64, cpu_percent: f32) -> Self {
        Self {
            current: Mutex::new(ResourceSample::new(memory_mb * MB, cpu_percent)),
            failing: AtomicBool::new(false),
            diagnostics: Mutex::new(DiagnosticSnapshot::default()),
        }
    }

    /// Snapshot handed out by `diagnostics`, cut to the requested limit.
    pub fn set_diagnostics(&self, snapshot: DiagnosticSnapshot) {
        *self.diagnostics.lock() = snapshot;
    }

    pub fn set(&self, memory_mb: u64, cpu_percent: f32) {
        *self.current.lock() = ResourceSample::new(memory_mb * MB, cpu_percent);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ResourceSampler for FakeSampler {
    fn sample(&self) -> AppResult<ResourceSample> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(quizcore::AppError::Validation("sampler offline".to_string()));
        }
        Ok(self.current.lock().clone())
    }

    fn diagnostics(&self, limit: usize) -> AppResult<DiagnosticSnapshot> {
        let full = self.diagnostics.lock().clone();
        let truncated = full.threads.len() > limit || full.open_files.len() > limit;
        Ok(DiagnosticSnapshot {
            threads: full.threads.into_iter().take(limit).collect(),
            open_files: full.open_files.into_iter().take(limit).collect(),
            truncated,
        })
    }
}

/// Membership fake: every chat is a member unless marked gone.
#[derive(Default)]
pub struct FakeMembership {
    gone: Mutex<HashSet<i64>>,
    failing: AtomicBool,
    pub checks: AtomicU32,
}

impl FakeMembership {
    pub fn remove(&self, chat_id: i64) {
        self.gone.lock().insert(chat_id);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipChecker for FakeMembership {
    async fn is_bot_member(&self, chat_id: i64) -> Result<bool, DeliveryError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::transient("getChatMember timed out"));
        }
        Ok(!self.gone.lock().contains(&chat_id))
    }
}

/// Retry policy with the default ceiling and short delays.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(40))
}

pub fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().expect("metrics registry"))
}

pub fn pool_config(max_workers: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        max_workers,
        queue_soft_cap: 100,
        dequeue_timeout: Duration::from_millis(200),
        stop_grace: Duration::from_secs(1),
        throttle: ThrottleLimits::default(),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<FakeMessenger>,
    pub catalog: Arc<StaticCatalog>,
    pub metrics: Arc<Metrics>,
    pub pool: Arc<WorkerPool>,
}

impl Harness {
    pub fn new(messenger: FakeMessenger, catalog: StaticCatalog, config: WorkerPoolConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let messenger = Arc::new(messenger);
        let catalog = Arc::new(catalog);
        let metrics = metrics();
        let delivery = QuizDelivery::new(
            store.clone(),
            catalog.clone(),
            messenger.clone(),
            DailyLimits {
                private: 100,
                group: 100,
            },
        )
        .with_retry(fast_retry());
        let pool = WorkerPool::new(config, delivery, Arc::clone(&metrics));

        Self {
            store,
            messenger,
            catalog,
            metrics,
            pool,
        }
    }

    pub fn general(questions: usize, max_workers: usize) -> Self {
        Self::new(
            FakeMessenger::new(),
            StaticCatalog::with_questions("general", questions),
            pool_config(max_workers),
        )
    }
}

/// Polls `condition` on the (usually paused) tokio clock.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
