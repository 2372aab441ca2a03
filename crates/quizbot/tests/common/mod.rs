//! Common test utilities
//!
//! Builds a full set of handler dependencies over the in-memory store, a
//! temporary catalog directory and fakes for the Bot API.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

use quizbot::telegram::HandlerDeps;
use quizcore::broadcast::{BroadcastConfig, BroadcastManager};
use quizcore::core::metrics::Metrics;
use quizcore::monitor::{MonitorConfig, ResourceMonitor, ResourceSample, ResourceSampler};
use quizcore::quiz::messenger::{BroadcastContent, MembershipChecker, PollReceipt, QuizMessenger};
use quizcore::quiz::{DailyLimits, FileQuizCatalog, QuizDelivery, Throttle, WorkerPool, WorkerPoolConfig};
use quizcore::scheduler::QuizScheduler;
use quizcore::storage::MemoryStore;
use quizcore::{AppResult, DeliveryError};

pub const ADMIN: i64 = 1;

/// Accepts everything and remembers the chats it was asked to reach.
#[derive(Default)]
pub struct NullMessenger {
    pub polls: Mutex<Vec<i64>>,
}

#[async_trait]
impl QuizMessenger for NullMessenger {
    async fn send_poll(
        &self,
        chat_id: i64,
        _question: &str,
        _options: &[String],
        _correct_option: u8,
        _anonymous: bool,
    ) -> Result<PollReceipt, DeliveryError> {
        self.polls.lock().push(chat_id);
        Ok(PollReceipt {
            poll_id: format!("poll-{}", chat_id),
            message_id: 1,
        })
    }

    async fn send_notice(&self, _chat_id: i64, _text: &str) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn send_broadcast(&self, _chat_id: i64, _content: &BroadcastContent) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[async_trait]
impl MembershipChecker for NullMessenger {
    async fn is_bot_member(&self, _chat_id: i64) -> Result<bool, DeliveryError> {
        Ok(true)
    }
}

struct IdleSampler;

impl ResourceSampler for IdleSampler {
    fn sample(&self) -> AppResult<ResourceSample> {
        Ok(ResourceSample::new(10 * 1024 * 1024, 1.0))
    }
}

const GENERAL: &str = r#"[
    {"id": "g1", "question": "2 + 2?", "options": ["3", "4"], "answer": 1},
    {"id": "g2", "question": "Capital of France?", "options": ["Paris", "Rome"], "answer": 0}
]"#;

const SCIENCE: &str = r#"[
    {"id": "s1", "question": "H2O is?", "options": ["water", "salt"], "answer": 0}
]"#;

pub struct Fixture {
    pub deps: HandlerDeps,
    pub store: Arc<MemoryStore>,
    pub messenger: Arc<NullMessenger>,
    // Keeps the catalog directory alive
    _dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("general.json"), GENERAL).unwrap();
        std::fs::write(dir.path().join("science.json"), SCIENCE).unwrap();

        let store = Arc::new(MemoryStore::new());
        let messenger = Arc::new(NullMessenger::default());
        let catalog = Arc::new(FileQuizCatalog::new(dir.path()));
        let metrics = Arc::new(Metrics::new().unwrap());

        let delivery = QuizDelivery::new(
            store.clone(),
            catalog.clone(),
            messenger.clone(),
            DailyLimits {
                private: 100,
                group: 100,
            },
        );
        let pool = WorkerPool::new(WorkerPoolConfig::default(), delivery, Arc::clone(&metrics));
        let broadcast = BroadcastManager::new(
            BroadcastConfig::default(),
            store.clone(),
            messenger.clone(),
            Arc::clone(&metrics),
        );
        let targets: Vec<Arc<dyn Throttle>> = vec![
            pool.clone() as Arc<dyn Throttle>,
            broadcast.clone() as Arc<dyn Throttle>,
        ];
        let monitor = ResourceMonitor::new(
            MonitorConfig::default(),
            Arc::new(IdleSampler),
            targets,
            Arc::clone(&metrics),
        )
        .unwrap();
        let scheduler = QuizScheduler::new(pool.clone(), store.clone(), messenger.clone());

        let deps = HandlerDeps {
            store: store.clone(),
            catalog,
            pool,
            scheduler,
            broadcast,
            monitor,
            admin_ids: Arc::new(vec![ADMIN]),
        };

        Self {
            deps,
            store,
            messenger,
            _dir: dir,
        }
    }
}
