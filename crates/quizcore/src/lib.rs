//! Quiz dispatch core for the quiz bot.
//!
//! Scheduled and manual quiz tasks flow through a priority [`TaskQueue`] into
//! a bounded [`WorkerPool`]. A [`ResourceMonitor`] samples the process and
//! throttles the pool and the [`BroadcastManager`] when memory or CPU run hot.
//!
//! Telegram itself stays behind the [`QuizMessenger`] and [`MembershipChecker`]
//! traits; the `telegram` feature adds error conversions for teloxide.
//!
//! [`TaskQueue`]: quiz::TaskQueue
//! [`WorkerPool`]: quiz::WorkerPool
//! [`ResourceMonitor`]: monitor::ResourceMonitor
//! [`BroadcastManager`]: broadcast::BroadcastManager
//! [`QuizMessenger`]: quiz::QuizMessenger
//! [`MembershipChecker`]: quiz::MembershipChecker

pub mod broadcast;
pub mod core;
pub mod monitor;
pub mod quiz;
pub mod scheduler;
pub mod storage;

pub use crate::core::error::{AppError, AppResult, DeliveryError};
