//! Bounded worker pool that drains the task queue.
//!
//! One dispatcher task pulls from [`TaskQueue`] and hands each task to one of
//! `max_workers` execution slots (a semaphore). When every slot is busy the
//! task goes back to its original queue position and the dispatcher waits for
//! a slot before dequeuing again, so urgent tasks that arrived meanwhile still
//! go first.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::admission::{AdmissionControl, Throttle, ThrottleLimits};
use super::delivery::{DeliveryOutcome, QuizDelivery};
use super::queue::TaskQueue;
use super::task::QuizTask;
use crate::core::config;
use crate::core::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub queue_soft_cap: usize,
    /// Dispatcher wake-up period on an empty queue
    pub dequeue_timeout: Duration,
    /// Bounded wait for in-flight deliveries in [`WorkerPool::stop`]
    pub stop_grace: Duration,
    pub throttle: ThrottleLimits,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: (*config::queue::MAX_WORKERS).max(1),
            queue_soft_cap: *config::queue::QUEUE_SOFT_CAP,
            dequeue_timeout: config::queue::dequeue_timeout(),
            stop_grace: config::queue::stop_grace(),
            throttle: ThrottleLimits::default(),
        }
    }
}

/// Snapshot returned by [`WorkerPool::get_stats`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerPoolStats {
    /// Deliveries executing right now
    pub active_threads: usize,
    pub max_workers: usize,
    pub queued_tasks: usize,
    pub active_chat_count: usize,
    /// Resident memory in bytes, as last seen by the resource monitor
    pub memory_usage: u64,
    pub cpu_percent: f32,
    pub total_sent: u64,
    pub failed_attempts: u64,
    /// Deliveries that needed at least one retry
    pub retry_success: u64,
    pub tasks_executed: u64,
    pub accepting_new: bool,
    pub batch_size: usize,
    pub rate_limit: u32,
}

#[derive(Debug, Default)]
struct Counters {
    active: usize,
    total_sent: u64,
    failed_attempts: u64,
    retry_success: u64,
    tasks_executed: u64,
    memory_usage: u64,
    cpu_percent: f32,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: TaskQueue,
    delivery: QuizDelivery,
    admission: Arc<AdmissionControl>,
    slots: Arc<Semaphore>,
    counters: Mutex<Counters>,
    /// In-flight execution count per chat
    inflight: Mutex<HashMap<i64, watch::Sender<u32>>>,
    running: AtomicBool,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, delivery: QuizDelivery, metrics: Arc<Metrics>) -> Arc<Self> {
        let admission = AdmissionControl::new("quiz-pool", config.throttle);
        let queue = TaskQueue::new(config.queue_soft_cap, Arc::clone(&admission));
        let slots = Arc::new(Semaphore::new(config.max_workers));

        Arc::new(Self {
            config,
            queue,
            delivery,
            admission,
            slots,
            counters: Mutex::new(Counters::default()),
            inflight: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
            metrics,
        })
    }

    /// Spawns the dispatcher. Calling it twice has no effect, and a stopped
    /// pool stays stopped.
    pub fn start(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            log::warn!("Quiz worker pool was stopped and cannot be restarted");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Starting quiz worker pool with {} workers", self.config.max_workers);
        let pool = Arc::clone(self);
        *self.dispatcher.lock() = Some(tokio::spawn(pool.run_dispatcher()));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Builds a task and enqueues it. Returns whether it was accepted.
    pub fn schedule(&self, chat_id: i64, category: &str, priority: u8) -> bool {
        let task = match QuizTask::new(chat_id, category, priority) {
            Ok(task) => task,
            Err(e) => {
                log::warn!("Refusing quiz task: {}", e);
                return false;
            }
        };

        let accepted = self.queue.enqueue(task);
        if !accepted {
            self.metrics.queue_rejected_total.inc();
        }
        self.update_queue_gauge();
        accepted
    }

    pub fn get_stats(&self) -> WorkerPoolStats {
        let settings = self.admission.settings();
        let counters = self.counters.lock();
        WorkerPoolStats {
            active_threads: counters.active,
            max_workers: self.config.max_workers,
            queued_tasks: self.queue.size(),
            active_chat_count: self.queue.active_chat_count(),
            memory_usage: counters.memory_usage,
            cpu_percent: counters.cpu_percent,
            total_sent: counters.total_sent,
            failed_attempts: counters.failed_attempts,
            retry_success: counters.retry_success,
            tasks_executed: counters.tasks_executed,
            accepting_new: self.admission.is_accepting(),
            batch_size: settings.batch_size,
            rate_limit: settings.rate_limit,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Drops every queued task. Returns the number removed.
    pub fn drain(&self) -> usize {
        let drained = self.queue.drain();
        self.update_queue_gauge();
        if drained > 0 {
            log::warn!("Drained {} pending quiz task(s)", drained);
        }
        drained
    }

    /// Waits until no delivery for `chat_id` is executing.
    pub async fn wait_for_chat(&self, chat_id: i64) {
        let receiver = self.inflight.lock().get(&chat_id).map(|tx| tx.subscribe());
        if let Some(mut receiver) = receiver {
            // A closed channel means the last execution finished and was removed
            let _ = receiver.wait_for(|count| *count == 0).await;
        }
    }

    /// Stops the dispatcher and waits, bounded by the grace period, for
    /// in-flight deliveries. Queued tasks are left in the queue.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("Stopping quiz worker pool");
        self.shutdown.cancel();

        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Quiz dispatcher ended abnormally: {}", e);
            }
        }
        self.slots.close();
        log::info!("Quiz worker pool stopped");
    }

    async fn run_dispatcher(self: Arc<Self>) {
        let mut executions = JoinSet::new();
        let mut reserved: Option<OwnedSemaphorePermit> = None;
        let mut last_dispatch: Option<Instant> = None;

        while self.running.load(Ordering::SeqCst) {
            while let Some(result) = executions.try_join_next() {
                if let Err(e) = result {
                    log::error!("Quiz execution panicked: {}", e);
                }
            }

            if self.admission.is_halted() {
                tokio::select! {
                    _ = self.admission.wait_until_open() => {}
                    _ = self.shutdown.cancelled() => break,
                }
                continue;
            }

            let dequeued = tokio::select! {
                task = self.queue.dequeue_blocking(self.config.dequeue_timeout) => task,
                _ = self.shutdown.cancelled() => break,
            };
            let Some(task) = dequeued else {
                continue;
            };
            self.update_queue_gauge();

            let permit = match reserved.take() {
                Some(permit) => permit,
                None => match Arc::clone(&self.slots).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(TryAcquireError::NoPermits) => {
                        log::debug!(
                            "All {} workers busy, requeueing task {} for chat {}",
                            self.config.max_workers,
                            task.id,
                            task.chat_id
                        );
                        self.queue.requeue(task);
                        tokio::select! {
                            permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                                Ok(permit) => reserved = Some(permit),
                                Err(_) => break,
                            },
                            _ = self.shutdown.cancelled() => break,
                        }
                        continue;
                    }
                    Err(TryAcquireError::Closed) => {
                        self.queue.requeue(task);
                        break;
                    }
                },
            };

            // Pace dispatches by the live rate limit
            let interval = self.admission.settings().send_interval();
            if let Some(last) = last_dispatch {
                tokio::time::sleep_until(last + interval).await;
            }
            last_dispatch = Some(Instant::now());

            self.spawn_execution(&mut executions, task, permit);
        }

        let grace = self.config.stop_grace;
        let finished = tokio::time::timeout(grace, async {
            while executions.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            log::warn!(
                "{} quiz deliveries still running after {:?}, aborting them",
                executions.len(),
                grace
            );
            executions.abort_all();
        }
    }

    /// Marks the chat busy and spawns its delivery. The guard lives inside the
    /// future, so an execution aborted before its first poll still releases
    /// the chat.
    fn spawn_execution(self: &Arc<Self>, executions: &mut JoinSet<()>, task: QuizTask, permit: OwnedSemaphorePermit) {
        let execution = self.begin_execution(task.chat_id);
        let pool = Arc::clone(self);
        executions.spawn(async move {
            let _permit = permit;
            let _execution = execution;
            pool.run_task(task).await;
        });
    }

    fn begin_execution(self: &Arc<Self>, chat_id: i64) -> Execution {
        self.begin_chat(chat_id);
        self.counters.lock().active += 1;
        self.metrics.active_workers.inc();
        Execution {
            pool: Arc::clone(self),
            chat_id,
        }
    }

    async fn run_task(&self, mut task: QuizTask) {
        let outcome = self.delivery.execute(&task).await;
        task.retry_count = outcome.attempts().saturating_sub(1);
        log::debug!(
            "Quiz task {} for chat {} finished: {} (retries: {})",
            task.id,
            task.chat_id,
            outcome.label(),
            task.retry_count
        );
        self.record_outcome(&outcome);
    }

    fn end_execution(&self, chat_id: i64) {
        {
            let mut counters = self.counters.lock();
            counters.active = counters.active.saturating_sub(1);
        }
        self.metrics.active_workers.dec();
        self.queue.release_chat(chat_id);
        self.finish_chat(chat_id);
    }

    fn record_outcome(&self, outcome: &DeliveryOutcome) {
        let mut counters = self.counters.lock();
        counters.tasks_executed += 1;

        match outcome {
            DeliveryOutcome::Delivered { attempts, .. } => {
                counters.total_sent += 1;
                self.metrics.quiz_sent_total.inc();
                if *attempts > 1 {
                    counters.retry_success += 1;
                    self.metrics.quiz_retry_success_total.inc();
                }
            }
            DeliveryOutcome::Failed { .. } => {
                counters.failed_attempts += 1;
                self.metrics.quiz_failed_total.inc();
            }
            DeliveryOutcome::LimitReached { .. } | DeliveryOutcome::Skipped(_) => {
                self.metrics
                    .quiz_skipped_total
                    .with_label_values(&[outcome.label()])
                    .inc();
            }
        }
    }

    fn begin_chat(&self, chat_id: i64) {
        self.inflight
            .lock()
            .entry(chat_id)
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|count| *count += 1);
    }

    fn finish_chat(&self, chat_id: i64) {
        let mut inflight = self.inflight.lock();
        let idle = match inflight.get(&chat_id) {
            Some(tx) => {
                tx.send_modify(|count| *count = count.saturating_sub(1));
                *tx.borrow() == 0
            }
            None => false,
        };
        if idle {
            inflight.remove(&chat_id);
        }
    }

    fn update_queue_gauge(&self) {
        self.metrics
            .queue_depth
            .set(i64::try_from(self.queue.size()).unwrap_or(i64::MAX));
    }
}

/// Released on completion and on abort after the stop grace period
struct Execution {
    pool: Arc<WorkerPool>,
    chat_id: i64,
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.pool.end_execution(self.chat_id);
    }
}

impl Throttle for WorkerPool {
    fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    fn drain_pending(&self) -> usize {
        self.drain()
    }

    fn trim(&self) {
        self.inflight.lock().shrink_to_fit();
    }

    fn clear_caches(&self) {
        self.delivery.catalog().clear_cache();
    }

    fn in_flight(&self) -> usize {
        self.counters.lock().active
    }

    fn observe(&self, memory_bytes: u64, cpu_percent: f32) {
        let mut counters = self.counters.lock();
        counters.memory_usage = memory_bytes;
        counters.cpu_percent = cpu_percent;
    }
}
