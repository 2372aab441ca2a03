//! One quiz delivery: daily cap, question selection with wrap-around, send
//! with retry, and bookkeeping.

use chrono::{NaiveDate, Utc};
use rand::seq::IndexedRandom;
use std::sync::Arc;

use super::catalog::{Question, QuizCatalog};
use super::messenger::QuizMessenger;
use super::task::QuizTask;
use crate::core::config;
use crate::core::error::{AppResult, DeliveryError};
use crate::core::retry::{retry, RetryConfig};
use crate::storage::{ChatKind, ChatState, PollRecord, QuizStore};

pub const LIMIT_REACHED_NOTICE: &str =
    "📊 Daily quiz limit reached for this chat. New quizzes will arrive again tomorrow!";
pub const RESTART_NOTICE: &str = "🎉 You've answered every quiz in this category! Restarting with all quizzes again.";

/// Daily delivery caps by conversation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLimits {
    pub private: u32,
    pub group: u32,
}

impl DailyLimits {
    pub fn from_env() -> Self {
        Self {
            private: *config::limits::DAILY_LIMIT_PRIVATE,
            group: *config::limits::DAILY_LIMIT_GROUP,
        }
    }

    pub fn for_kind(&self, kind: ChatKind) -> u32 {
        match kind {
            ChatKind::Private => self.private,
            ChatKind::Group => self.group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The chat paused its quizzes
    Paused,
}

/// How a single execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        question_id: String,
        attempts: u32,
        /// The used set was reset before this pick
        wrapped: bool,
    },
    /// Daily cap already met. `notified` is true only for the one tick that
    /// sent the notice.
    LimitReached { notified: bool },
    Skipped(SkipReason),
    Failed {
        reason: String,
        attempts: u32,
        transient: bool,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } | DeliveryOutcome::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered { .. } => "delivered",
            DeliveryOutcome::LimitReached { .. } => "limit_reached",
            DeliveryOutcome::Skipped(_) => "skipped",
            DeliveryOutcome::Failed { .. } => "failed",
        }
    }
}

/// Executes quiz tasks against the store, catalog and messenger.
pub struct QuizDelivery {
    store: Arc<dyn QuizStore>,
    catalog: Arc<dyn QuizCatalog>,
    messenger: Arc<dyn QuizMessenger>,
    retry: RetryConfig,
    limits: DailyLimits,
}

impl QuizDelivery {
    pub fn new(
        store: Arc<dyn QuizStore>,
        catalog: Arc<dyn QuizCatalog>,
        messenger: Arc<dyn QuizMessenger>,
        limits: DailyLimits,
    ) -> Self {
        Self {
            store,
            catalog,
            messenger,
            retry: RetryConfig::default(),
            limits,
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn catalog(&self) -> &Arc<dyn QuizCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn QuizStore> {
        &self.store
    }

    pub async fn execute(&self, task: &QuizTask) -> DeliveryOutcome {
        self.execute_on(task, Utc::now().date_naive()).await
    }

    /// Executes `task` counting daily deliveries against `date`.
    /// Never returns an error: every failure becomes [`DeliveryOutcome::Failed`].
    pub async fn execute_on(&self, task: &QuizTask, date: NaiveDate) -> DeliveryOutcome {
        match self.try_execute(task, date).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Quiz task {} for chat {} failed: {}", task.id, task.chat_id, e);
                DeliveryOutcome::Failed {
                    reason: e.to_string(),
                    attempts: 0,
                    transient: false,
                }
            }
        }
    }

    async fn try_execute(&self, task: &QuizTask, date: NaiveDate) -> AppResult<DeliveryOutcome> {
        let chat_id = task.chat_id;
        let mut state = self
            .store
            .get_chat_state(chat_id)?
            .unwrap_or_else(|| ChatState::new(task.category.clone()));

        if state.paused {
            log::debug!("Chat {} is paused, skipping quiz", chat_id);
            return Ok(DeliveryOutcome::Skipped(SkipReason::Paused));
        }

        let kind = ChatKind::from_chat_id(chat_id);
        let cap = self.limits.for_kind(kind);
        if self.store.daily_count(chat_id, date)? >= cap {
            let notified = self.store.mark_limit_notified(chat_id, date)?;
            if notified {
                log::info!("Chat {} reached its daily {} cap of {}", chat_id, kind.as_str(), cap);
                self.notify(chat_id, LIMIT_REACHED_NOTICE).await;
            }
            return Ok(DeliveryOutcome::LimitReached { notified });
        }

        let questions = self.catalog.get_questions(&state.category)?;
        if questions.is_empty() {
            return Ok(DeliveryOutcome::Failed {
                reason: format!("no questions in category '{}'", state.category),
                attempts: 0,
                transient: false,
            });
        }

        let mut available: Vec<&Question> = questions
            .iter()
            .filter(|q| !state.used_question_ids.contains(&q.id))
            .collect();

        let wrapped = available.is_empty();
        if wrapped {
            log::info!(
                "Chat {} exhausted {} question(s) in '{}', resetting",
                chat_id,
                questions.len(),
                state.category
            );
            state.used_question_ids.clear();
            // Persist the reset first so a failed send cannot re-trigger the notice
            self.store.put_chat_state(chat_id, &state)?;
            self.notify(chat_id, RESTART_NOTICE).await;
            available = questions.iter().collect();
        }

        let picked = {
            let mut rng = rand::rng();
            available.choose(&mut rng).map(|q| (*q).clone())
        };
        let Some(question) = picked else {
            return Ok(DeliveryOutcome::Failed {
                reason: "no question available".to_string(),
                attempts: 0,
                transient: false,
            });
        };

        let outcome = retry(&self.retry, || {
            self.messenger
                .send_poll(chat_id, &question.text, &question.options, question.correct_option, false)
        })
        .await;

        let attempts = outcome.attempts;
        let receipt = match outcome.result {
            Ok(receipt) => receipt,
            Err(err) => {
                let last: DeliveryError = err.into_last_error();
                log::warn!(
                    "Giving up on quiz for chat {} after {} attempt(s): {}",
                    chat_id,
                    attempts,
                    last
                );
                return Ok(DeliveryOutcome::Failed {
                    reason: last.to_string(),
                    attempts,
                    transient: last.is_transient(),
                });
            }
        };

        // Re-read so concurrent edits (interval, category) are not overwritten
        let mut latest = self.store.get_chat_state(chat_id)?.unwrap_or(state);
        latest.used_question_ids.insert(question.id.clone());
        self.store.put_chat_state(chat_id, &latest)?;
        self.store.increment_and_get(chat_id, date)?;
        self.store.record_poll(&PollRecord {
            poll_id: receipt.poll_id,
            chat_id,
            message_id: receipt.message_id,
            question_id: question.id.clone(),
            correct_option: question.correct_option,
        })?;

        Ok(DeliveryOutcome::Delivered {
            question_id: question.id,
            attempts,
            wrapped,
        })
    }

    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_notice(chat_id, text).await {
            log::warn!("Failed to send notice to chat {}: {}", chat_id, e);
        }
    }
}
