use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::admission::AdmissionControl;
use super::task::QuizTask;

#[derive(Debug, Default)]
struct QueueInner {
    /// Keyed by (priority, arrival sequence)
    tasks: BTreeMap<(u8, u64), QuizTask>,
    next_sequence: u64,
    /// Chats with queued or executing tasks, with their task counts
    active_chats: HashMap<i64, usize>,
}

impl QueueInner {
    fn release(&mut self, chat_id: i64) {
        if let Some(count) = self.active_chats.get_mut(&chat_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.active_chats.remove(&chat_id);
            }
        }
    }
}

/// Priority queue of pending quiz deliveries.
///
/// Ordered by priority ascending, then arrival order. One coarse lock guards
/// the tasks and the active-chat set together.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
    soft_cap: usize,
    admission: Arc<AdmissionControl>,
}

impl TaskQueue {
    pub fn new(soft_cap: usize, admission: Arc<AdmissionControl>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Notify::new(),
            soft_cap,
            admission,
        }
    }

    /// Adds a task. Returns false, leaving the queue untouched, when the
    /// admission gate is closed or the queue has reached its soft cap.
    pub fn enqueue(&self, mut task: QuizTask) -> bool {
        if !self.admission.is_accepting() {
            log::info!(
                "Rejected quiz task for chat {}: intake paused",
                task.chat_id
            );
            return false;
        }

        {
            let mut inner = self.inner.lock();
            if inner.tasks.len() >= self.soft_cap {
                log::warn!(
                    "Quiz queue is full ({} tasks), rejecting task for chat {}",
                    inner.tasks.len(),
                    task.chat_id
                );
                return false;
            }

            let sequence = inner.next_sequence;
            inner.next_sequence += 1;
            task.sequence = Some(sequence);
            *inner.active_chats.entry(task.chat_id).or_insert(0) += 1;
            log::debug!(
                "Queued quiz task {} for chat {} (priority {}, queue size {})",
                task.id,
                task.chat_id,
                task.priority,
                inner.tasks.len() + 1
            );
            inner.tasks.insert((task.priority, sequence), task);
        }

        self.available.notify_one();
        true
    }

    /// Puts a task back at its original position. Bypasses the gate and the
    /// soft cap: the task was already admitted once.
    pub fn requeue(&self, mut task: QuizTask) {
        {
            let mut inner = self.inner.lock();
            let sequence = match task.sequence {
                Some(sequence) => sequence,
                None => {
                    let sequence = inner.next_sequence;
                    inner.next_sequence += 1;
                    *inner.active_chats.entry(task.chat_id).or_insert(0) += 1;
                    sequence
                }
            };
            task.sequence = Some(sequence);
            inner.tasks.insert((task.priority, sequence), task);
        }
        self.available.notify_one();
    }

    fn pop(&self) -> Option<QuizTask> {
        self.inner.lock().tasks.pop_first().map(|(_, task)| task)
    }

    /// Next task by (priority, arrival), or `None` once `timeout` elapses with
    /// the queue still empty.
    pub async fn dequeue_blocking(&self, timeout: Duration) -> Option<QuizTask> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.pop() {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.pop();
            }
        }
    }

    /// Non-blocking variant of [`TaskQueue::dequeue_blocking`].
    pub fn try_dequeue(&self) -> Option<QuizTask> {
        self.pop()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drops every pending task. Returns the number removed.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let drained = std::mem::take(&mut inner.tasks);
        for task in drained.values() {
            inner.release(task.chat_id);
        }
        drained.len()
    }

    /// Marks one task of `chat_id` as finished.
    pub fn release_chat(&self, chat_id: i64) {
        self.inner.lock().release(chat_id);
    }

    pub fn active_chat_count(&self) -> usize {
        self.inner.lock().active_chats.len()
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }
}
