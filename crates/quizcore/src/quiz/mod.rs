//! Quiz dispatch: tasks, the priority queue, admission control, the worker
//! pool and everything a single delivery touches.

pub mod admission;
pub mod catalog;
pub mod delivery;
pub mod messenger;
pub mod pool;
pub mod queue;
pub mod stats;
pub mod task;

pub use admission::{AdmissionControl, Throttle, ThrottleLimits, ThrottleSettings};
pub use catalog::{FileQuizCatalog, Question, QuizCatalog};
pub use delivery::{DailyLimits, DeliveryOutcome, QuizDelivery};
pub use messenger::{BroadcastContent, MembershipChecker, PollReceipt, QuizMessenger};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolStats};
pub use queue::TaskQueue;
pub use task::{priority, QuizTask};
