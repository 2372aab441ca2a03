//! In-process store for tests and dry runs. Nothing survives a restart.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{
    ChatState, ChatStateStore, DailyCountStore, LeaderboardStore, PollLedger, PollRecord, QuizAttempt, ScoreEntry,
    ServedStore,
};
use crate::core::error::AppResult;

#[derive(Debug, Default)]
struct MemoryInner {
    chats: BTreeMap<i64, ChatState>,
    daily: HashMap<(i64, NaiveDate), u32>,
    notified: HashSet<(i64, NaiveDate)>,
    polls: HashMap<String, PollRecord>,
    served_chats: Vec<i64>,
    served_users: Vec<i64>,
    scores: Vec<ScoreEntry>,
    attempts: Vec<QuizAttempt>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatStateStore for MemoryStore {
    fn get_chat_state(&self, chat_id: i64) -> AppResult<Option<ChatState>> {
        Ok(self.inner.lock().chats.get(&chat_id).cloned())
    }

    fn put_chat_state(&self, chat_id: i64, state: &ChatState) -> AppResult<()> {
        self.inner.lock().chats.insert(chat_id, state.clone());
        Ok(())
    }

    fn list_active(&self) -> AppResult<Vec<i64>> {
        Ok(self
            .inner
            .lock()
            .chats
            .iter()
            .filter(|(_, state)| state.active)
            .map(|(chat_id, _)| *chat_id)
            .collect())
    }
}

impl DailyCountStore for MemoryStore {
    fn daily_count(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32> {
        Ok(self.inner.lock().daily.get(&(chat_id, date)).copied().unwrap_or(0))
    }

    fn increment_and_get(&self, chat_id: i64, date: NaiveDate) -> AppResult<u32> {
        let mut inner = self.inner.lock();
        let count = inner.daily.entry((chat_id, date)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn mark_limit_notified(&self, chat_id: i64, date: NaiveDate) -> AppResult<bool> {
        Ok(self.inner.lock().notified.insert((chat_id, date)))
    }
}

impl PollLedger for MemoryStore {
    fn record_poll(&self, record: &PollRecord) -> AppResult<()> {
        self.inner.lock().polls.insert(record.poll_id.clone(), record.clone());
        Ok(())
    }

    fn find_poll(&self, poll_id: &str) -> AppResult<Option<PollRecord>> {
        Ok(self.inner.lock().polls.get(poll_id).cloned())
    }
}

impl ServedStore for MemoryStore {
    fn add_served_chat(&self, chat_id: i64) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if !inner.served_chats.contains(&chat_id) {
            inner.served_chats.push(chat_id);
        }
        Ok(())
    }

    fn add_served_user(&self, user_id: i64) -> AppResult<()> {
        let mut inner = self.inner.lock();
        if !inner.served_users.contains(&user_id) {
            inner.served_users.push(user_id);
        }
        Ok(())
    }

    fn served_chats(&self) -> AppResult<Vec<i64>> {
        Ok(self.inner.lock().served_chats.clone())
    }

    fn served_users(&self) -> AppResult<Vec<i64>> {
        Ok(self.inner.lock().served_users.clone())
    }
}

impl LeaderboardStore for MemoryStore {
    fn add_score(&self, user_id: i64, display_name: &str, points: i64) -> AppResult<()> {
        let mut inner = self.inner.lock();
        match inner.scores.iter_mut().find(|entry| entry.user_id == user_id) {
            Some(entry) => {
                entry.score += points;
                entry.display_name = display_name.to_string();
            }
            None => inner.scores.push(ScoreEntry {
                user_id,
                display_name: display_name.to_string(),
                score: points,
            }),
        }
        Ok(())
    }

    fn all_scores(&self) -> AppResult<Vec<ScoreEntry>> {
        let mut scores = self.inner.lock().scores.clone();
        // Stable sort keeps insertion order among ties
        scores.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(scores)
    }

    fn record_attempt(&self, attempt: &QuizAttempt) -> AppResult<()> {
        self.inner.lock().attempts.push(attempt.clone());
        Ok(())
    }

    fn attempts_for(&self, user_id: i64) -> AppResult<Vec<QuizAttempt>> {
        Ok(self
            .inner
            .lock()
            .attempts
            .iter()
            .rev()
            .filter(|attempt| attempt.user_id == user_id)
            .cloned()
            .collect())
    }

    fn has_answered(&self, user_id: i64, poll_id: &str) -> AppResult<bool> {
        Ok(self
            .inner
            .lock()
            .attempts
            .iter()
            .any(|attempt| attempt.user_id == user_id && attempt.poll_id == poll_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_active_creates_and_lists() {
        let store = MemoryStore::new();
        store.set_active(-100, true).unwrap();
        store.set_active(5, true).unwrap();
        store.set_active(5, false).unwrap();

        assert_eq!(store.list_active().unwrap(), vec![-100]);
        assert!(store.get_chat_state(5).unwrap().is_some());
    }

    #[test]
    fn test_limit_notice_marked_once_per_day() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        assert!(store.mark_limit_notified(1, today).unwrap());
        assert!(!store.mark_limit_notified(1, today).unwrap());
        assert!(store.mark_limit_notified(1, tomorrow).unwrap());
    }

    #[test]
    fn test_scores_sorted_and_accumulated() {
        let store = MemoryStore::new();
        store.add_score(1, "ann", 2).unwrap();
        store.add_score(2, "bob", 4).unwrap();
        store.add_score(1, "ann", 4).unwrap();

        let top = store.top_scores(1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].user_id, 1);
        assert_eq!(top[0].score, 6);
    }

    #[test]
    fn test_attempts_newest_first() {
        let store = MemoryStore::new();
        for (i, correct) in [true, false].into_iter().enumerate() {
            store
                .record_attempt(&QuizAttempt {
                    user_id: 9,
                    poll_id: format!("p{}", i),
                    correct,
                    points: if correct { 2 } else { 0 },
                    answered_at: Utc::now(),
                })
                .unwrap();
        }

        let attempts = store.attempts_for(9).unwrap();
        assert_eq!(attempts[0].poll_id, "p1");
        assert!(store.has_answered(9, "p0").unwrap());
        assert!(!store.has_answered(9, "p2").unwrap());
    }
}
