//! Handler types, dependencies, and served-audience helpers

use std::sync::Arc;

use teloxide::types::{Message, User};

use quizcore::broadcast::BroadcastManager;
use quizcore::monitor::ResourceMonitor;
use quizcore::quiz::{FileQuizCatalog, WorkerPool};
use quizcore::scheduler::QuizScheduler;
use quizcore::storage::QuizStore;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub store: Arc<dyn QuizStore>,
    pub catalog: Arc<FileQuizCatalog>,
    pub pool: Arc<WorkerPool>,
    pub scheduler: Arc<QuizScheduler>,
    pub broadcast: Arc<BroadcastManager>,
    pub monitor: Arc<ResourceMonitor>,
    pub admin_ids: Arc<Vec<i64>>,
}

impl HandlerDeps {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    /// Remembers the chat and the sender as broadcast targets. Failures are
    /// logged and otherwise ignored.
    pub fn register_served(&self, msg: &Message) {
        let chat_id = msg.chat.id.0;
        let registered = if chat_id < 0 {
            self.store.add_served_chat(chat_id)
        } else {
            self.store.add_served_user(chat_id)
        };
        if let Err(e) = registered {
            log::error!("Failed to register served chat {}: {}", chat_id, e);
        }

        if let Some(user_id) = msg.from.as_ref().and_then(user_id) {
            if user_id != chat_id {
                if let Err(e) = self.store.add_served_user(user_id) {
                    log::error!("Failed to register served user {}: {}", user_id, e);
                }
            }
        }
    }
}

/// Telegram user ids fit in 52 bits; anything else is treated as unknown.
pub fn user_id(user: &User) -> Option<i64> {
    i64::try_from(user.id.0).ok()
}

/// Name shown on the leaderboard.
pub fn display_name(user: &User) -> String {
    let full_name = user.full_name();
    if !full_name.trim().is_empty() {
        return full_name;
    }
    match &user.username {
        Some(username) => format!("@{}", username),
        None => format!("user {}", user.id.0),
    }
}
